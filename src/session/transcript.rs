//! 会话聊天记录：按响应聚合文本增量，导出纯文本日志。

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::control::ServerEvent;

use super::events::{SessionEvent, SessionEventKind};
use super::state::SessionPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: SystemTime,
}

#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
    pending: HashMap<String, (SystemTime, String)>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &SessionEvent) {
        let server = match &event.kind {
            SessionEventKind::Server(server) => server,
            SessionEventKind::StateChanged(SessionPhase::Closed | SessionPhase::Error) => {
                self.flush();
                return;
            }
            _ => return,
        };

        match server {
            ServerEvent::TextDelta { response_id, delta } => {
                let key = response_id.clone().unwrap_or_default();
                self.pending
                    .entry(key)
                    .or_insert_with(|| (event.issued_at, String::new()))
                    .1
                    .push_str(delta);
            }
            ServerEvent::TextDone { response_id, text } => {
                let key = response_id.clone().unwrap_or_default();
                let (at, assembled) = self
                    .pending
                    .remove(&key)
                    .unwrap_or_else(|| (event.issued_at, String::new()));
                let text = text.clone().unwrap_or(assembled);
                self.push(Speaker::Assistant, text, at);
            }
            ServerEvent::ResponseDone { response_id } => {
                let key = response_id.clone().unwrap_or_default();
                if let Some((at, text)) = self.pending.remove(&key) {
                    self.push(Speaker::Assistant, text, at);
                }
            }
            ServerEvent::InputTranscript { transcript, .. } => {
                self.push(Speaker::User, transcript.clone(), event.issued_at);
            }
            _ => {}
        }
    }

    /// 将没有收到结束事件的增量文本按到达时间落为记录。
    pub fn flush(&mut self) {
        let mut pending: Vec<_> = self.pending.drain().map(|(_, entry)| entry).collect();
        pending.sort_by_key(|(at, _)| *at);
        for (at, text) in pending {
            self.push(Speaker::Assistant, text, at);
        }
    }

    /// 记录用户键入的文本轮次。
    pub fn push_user_text<S: Into<String>>(&mut self, text: S) {
        self.push(Speaker::User, text.into(), SystemTime::now());
    }

    fn push(&mut self, speaker: Speaker, text: String, at: SystemTime) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.entries.push(TranscriptEntry { speaker, text, at });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 每条记录一行：`[<unix 毫秒>] <角色>: <文本>`。
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                let millis = entry
                    .at
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_millis())
                    .unwrap_or(0);
                format!("[{millis}] {}: {}", entry.speaker.as_str(), entry.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

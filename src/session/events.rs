//! 会话对外事件流。

use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::debug;

use crate::control::ServerEvent;
use crate::error::SessionError;
use crate::media::PeerConnectionState;

use super::state::SessionPhase;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    StateChanged(SessionPhase),
    ConnectionState(PeerConnectionState),
    ChannelOpened,
    ChannelClosed,
    RemoteAudioAttached { track_id: String },
    Server(ServerEvent),
    Error(SessionError),
}

/// 带会话内单调序号的事件。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: String,
    pub sequence: u64,
    pub issued_at: SystemTime,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn is_error(&self) -> bool {
        matches!(self.kind, SessionEventKind::Error(_))
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        match self.kind {
            SessionEventKind::StateChanged(phase) => Some(phase),
            _ => None,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// 会话独占的发送端；随会话进入终态而释放。
pub(crate) struct EventEmitter {
    session_id: String,
    sender: EventSender,
    sequence: u64,
}

impl EventEmitter {
    pub(crate) fn new(session_id: &str, sender: EventSender) -> Self {
        Self {
            session_id: session_id.to_string(),
            sender,
            sequence: 0,
        }
    }

    pub(crate) fn emit(&mut self, kind: SessionEventKind) {
        self.sequence += 1;
        let event = SessionEvent {
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            issued_at: SystemTime::now(),
            kind,
        };
        if self.sender.send(event).is_err() {
            debug!(
                target: "session_manager",
                session_id = %self.session_id,
                sequence = self.sequence,
                "event receiver dropped"
            );
        }
    }
}

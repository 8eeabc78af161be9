use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::capture::CaptureSource;
use crate::control::{ClientEvent, ControlChannel, SendGate};
use crate::error::SessionError;
use crate::media::PeerConnection;
use crate::sink::AudioSinkController;

use super::events::EventEmitter;
use super::health::ConnectionHealth;
use super::types::SessionInfo;

/// 会话状态机的阶段划分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Starting,
    Active,
    Paused,
    Error,
    Closed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Starting => "starting",
            SessionPhase::Active => "active",
            SessionPhase::Paused => "paused",
            SessionPhase::Error => "error",
            SessionPhase::Closed => "closed",
        }
    }

    /// 持有设备或连接资源的阶段。
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionPhase::Starting | SessionPhase::Active | SessionPhase::Paused
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 协商完成后会话持有的全部媒体资源。
pub(crate) struct SessionLink {
    pub(crate) capture: CaptureSource,
    pub(crate) peer: Arc<dyn PeerConnection>,
    pub(crate) control: Arc<ControlChannel>,
    pub(crate) sink: AudioSinkController,
    pub(crate) health: ConnectionHealth,
    pub(crate) relay: Option<JoinHandle<()>>,
}

impl SessionLink {
    /// 释放所有资源；`graceful` 时先通知远端停止轮次检测。
    pub(crate) fn teardown(mut self, session_id: &str, graceful: bool) {
        if graceful && self.control.is_open() {
            if let Err(err) = self
                .control
                .send(&ClientEvent::disable_turn_detection().into(), SendGate::Open)
            {
                warn!(
                    target: "session_manager",
                    session_id,
                    %err,
                    "failed to send closing session.update"
                );
            }
        }

        self.capture.stop();
        self.control.close();
        self.peer.close();
        self.sink.release();
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

pub(crate) struct LiveSession {
    pub(crate) info: SessionInfo,
    pub(crate) events: EventEmitter,
    pub(crate) link: SessionLink,
}

pub(crate) enum StartPhase {
    Negotiating,
    AwaitingChannel(SessionLink),
}

/// 每个状态只携带该状态下有效的资源。
pub(crate) enum SessionState {
    Idle,
    Starting {
        info: SessionInfo,
        events: EventEmitter,
        phase: StartPhase,
    },
    Active(LiveSession),
    Paused(LiveSession),
    Error {
        info: SessionInfo,
        error: SessionError,
    },
    Closed,
}

impl SessionState {
    pub(crate) fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Starting { .. } => SessionPhase::Starting,
            SessionState::Active(_) => SessionPhase::Active,
            SessionState::Paused(_) => SessionPhase::Paused,
            SessionState::Error { .. } => SessionPhase::Error,
            SessionState::Closed => SessionPhase::Closed,
        }
    }

    pub(crate) fn info(&self) -> Option<&SessionInfo> {
        match self {
            SessionState::Starting { info, .. } | SessionState::Error { info, .. } => Some(info),
            SessionState::Active(live) | SessionState::Paused(live) => Some(&live.info),
            SessionState::Idle | SessionState::Closed => None,
        }
    }

    pub(crate) fn error(&self) -> Option<&SessionError> {
        match self {
            SessionState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub(crate) fn is_session(&self, session_id: &str) -> bool {
        self.info().is_some_and(|info| info.id == session_id)
    }

    pub(crate) fn link(&self) -> Option<&SessionLink> {
        match self {
            SessionState::Starting {
                phase: StartPhase::AwaitingChannel(link),
                ..
            } => Some(link),
            SessionState::Active(live) | SessionState::Paused(live) => Some(&live.link),
            _ => None,
        }
    }

    /// 同时借出事件发送端与媒体资源，仅在会话持有连接时可用。
    pub(crate) fn link_mut(&mut self) -> Option<(&mut EventEmitter, &mut SessionLink)> {
        match self {
            SessionState::Starting {
                events,
                phase: StartPhase::AwaitingChannel(link),
                ..
            } => Some((events, link)),
            SessionState::Active(live) | SessionState::Paused(live) => {
                Some((&mut live.events, &mut live.link))
            }
            _ => None,
        }
    }
}

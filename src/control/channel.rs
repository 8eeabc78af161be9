use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::control::message::ControlMessage;
use crate::error::SessionError;
use crate::media::{ChannelState, DataChannel};
use crate::telemetry::events::record_control_send;

/// 会话状态决定的下发闸门。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendGate {
    Open,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    ChannelNotOpen,
    Paused,
    SessionInactive,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::ChannelNotOpen => "channel_not_open",
            SuppressReason::Paused => "paused",
            SuppressReason::SessionInactive => "session_inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Suppressed(SuppressReason),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// 复用在对等连接上的有序可靠控制通道。
pub struct ControlChannel {
    session_id: String,
    inner: Arc<dyn DataChannel>,
    sent: AtomicU64,
    suppressed: AtomicU64,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("session_id", &self.session_id)
            .field("sent", &self.sent_count())
            .field("suppressed", &self.suppressed_count())
            .finish_non_exhaustive()
    }
}

impl ControlChannel {
    pub(crate) fn new<S: Into<String>>(session_id: S, inner: Arc<dyn DataChannel>) -> Self {
        Self {
            session_id: session_id.into(),
            inner,
            sent: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> String {
        self.inner.label()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state() == ChannelState::Open
    }

    pub fn send(
        &self,
        message: &ControlMessage,
        gate: SendGate,
    ) -> Result<SendOutcome, SessionError> {
        let message_type = message.message_type();

        let reason = if gate == SendGate::Paused && !message.is_control_directive() {
            Some(SuppressReason::Paused)
        } else if !self.is_open() {
            Some(SuppressReason::ChannelNotOpen)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.suppressed.fetch_add(1, Ordering::SeqCst);
            debug!(
                target: "control_channel",
                session_id = %self.session_id,
                message_type,
                reason = reason.as_str(),
                "suppressed outbound control message"
            );
            record_control_send(&self.session_id, message_type, reason.as_str());
            return Ok(SendOutcome::Suppressed(reason));
        }

        let wire = message.to_wire()?;
        if let Err(err) = self.inner.send_text(&wire) {
            warn!(
                target: "control_channel",
                session_id = %self.session_id,
                message_type,
                %err,
                "failed to deliver control message"
            );
            record_control_send(&self.session_id, message_type, "failed");
            return Err(SessionError::control(format!(
                "failed to deliver `{message_type}`: {err}"
            )));
        }

        self.sent.fetch_add(1, Ordering::SeqCst);
        record_control_send(&self.session_id, message_type, "sent");
        Ok(SendOutcome::Sent)
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        if self.inner.state() != ChannelState::Closed {
            self.inner.close();
        }
    }
}

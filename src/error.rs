//! 会话错误分类。

use thiserror::Error;

use crate::media::PeerConnectionState;
use crate::negotiation::NegotiationStage;
use crate::session::SessionPhase;

const MICROPHONE_HINT: &str =
    "Microphone access is required. Please allow microphone access and try again.";
const DEVICE_HINT: &str =
    "Unable to start voice chat. Please ensure you have a working microphone connected.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("microphone permission denied: {reason}")]
    PermissionDenied { reason: String },
    #[error("no audio input device available: {reason}")]
    DeviceUnavailable { reason: String },
    #[error("credential fetch failed{}: {message}", status_suffix(.status))]
    CredentialFetchFailed { status: Option<u16>, message: String },
    #[error("negotiation failed during {stage}: {message}")]
    NegotiationFailed {
        stage: NegotiationStage,
        message: String,
    },
    #[error("connection lost ({state})")]
    ConnectionLost { state: PeerConnectionState },
    #[error("control channel error: {message}")]
    ControlChannelError { message: String },
    #[error("a voice session is already {phase}")]
    SessionAlreadyActive { phase: SessionPhase },
    #[error("cannot {operation} while session is {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: SessionPhase,
    },
    #[error("invalid voice profile: {reason}")]
    InvalidVoiceProfile { reason: String },
    #[error("session start cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl SessionError {
    pub fn permission_denied<S: Into<String>>(reason: S) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn device_unavailable<S: Into<String>>(reason: S) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    pub fn credential<S: Into<String>>(status: Option<u16>, message: S) -> Self {
        Self::CredentialFetchFailed {
            status,
            message: message.into(),
        }
    }

    pub fn negotiation<S: Into<String>>(stage: NegotiationStage, message: S) -> Self {
        Self::NegotiationFailed {
            stage,
            message: message.into(),
        }
    }

    pub fn control<S: Into<String>>(message: S) -> Self {
        Self::ControlChannelError {
            message: message.into(),
        }
    }

    /// 遥测与日志使用的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied { .. } => "permission_denied",
            SessionError::DeviceUnavailable { .. } => "device_unavailable",
            SessionError::CredentialFetchFailed { .. } => "credential_fetch_failed",
            SessionError::NegotiationFailed { .. } => "negotiation_failed",
            SessionError::ConnectionLost { .. } => "connection_lost",
            SessionError::ControlChannelError { .. } => "control_channel_error",
            SessionError::SessionAlreadyActive { .. } => "session_already_active",
            SessionError::InvalidTransition { .. } => "invalid_transition",
            SessionError::InvalidVoiceProfile { .. } => "invalid_voice_profile",
            SessionError::Cancelled => "cancelled",
        }
    }

    /// 用户可自行处理（授权、插入设备）的错误。
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied { .. } | SessionError::DeviceUnavailable { .. }
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied { .. } => MICROPHONE_HINT.to_string(),
            SessionError::DeviceUnavailable { .. } => DEVICE_HINT.to_string(),
            SessionError::ConnectionLost { .. } => {
                "The voice connection was lost. Start the session again to reconnect.".to_string()
            }
            SessionError::CredentialFetchFailed { .. } | SessionError::NegotiationFailed { .. } => {
                "Unable to reach the voice service right now. Please try again shortly."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

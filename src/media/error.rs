use thiserror::Error;

use crate::error::SessionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture permission denied: {message}")]
    PermissionDenied { message: String },
    #[error("capture device unavailable: {message}")]
    DeviceUnavailable { message: String },
}

impl CaptureError {
    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn device_unavailable<S: Into<String>>(message: S) -> Self {
        Self::DeviceUnavailable {
            message: message.into(),
        }
    }
}

impl From<CaptureError> for SessionError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied { message } => SessionError::permission_denied(message),
            CaptureError::DeviceUnavailable { message } => {
                SessionError::device_unavailable(message)
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("media object already closed")]
    Closed,
    #[error("media platform failure: {message}")]
    Platform { message: String },
}

impl MediaError {
    pub fn platform<S: Into<String>>(message: S) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}

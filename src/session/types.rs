use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// 远端语音配置，规范化为小写标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoiceProfile(String);

impl VoiceProfile {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(SessionError::InvalidVoiceProfile {
                reason: "voice profile must not be empty".into(),
            });
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(SessionError::InvalidVoiceProfile {
                reason: format!("voice profile `{normalized}` must be a single identifier"),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoiceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VoiceProfile {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VoiceProfile::parse(&value)
    }
}

impl From<VoiceProfile> for String {
    fn from(value: VoiceProfile) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub voice: VoiceProfile,
    pub instructions: Option<String>,
    pub label: Option<String>,
}

impl StartRequest {
    pub fn new(voice: VoiceProfile) -> Self {
        Self {
            voice,
            instructions: None,
            label: None,
        }
    }

    pub fn with_instructions<S: Into<String>>(mut self, instructions: S) -> Self {
        let instructions = instructions.into();
        self.instructions = (!instructions.trim().is_empty()).then_some(instructions);
        self
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub voice: VoiceProfile,
    pub instructions: Option<String>,
    pub label: Option<String>,
    pub started_at: SystemTime,
    monotonic_start: Instant,
}

impl SessionInfo {
    pub(crate) fn new(id: String, request: StartRequest) -> Self {
        Self {
            id,
            voice: request.voice,
            instructions: request.instructions,
            label: request.label,
            started_at: SystemTime::now(),
            monotonic_start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.monotonic_start.elapsed()
    }
}

//! Counsel Realtime Core Library
//!
//! This crate manages a single real-time voice session between a counseling
//! client and a hosted conversational model: credential brokering, microphone
//! capture, peer negotiation, the control channel and remote audio playback.

pub mod capture;
pub mod config;
pub mod control;
pub mod credential;
pub mod error;
mod http;
pub mod media;
pub mod negotiation;
pub mod session;
pub mod sink;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use capture::{CaptureSource, PermissionProbe};
pub use config::RealtimeConfig;
pub use control::{ClientEvent, ControlMessage, SendOutcome, ServerEvent};
pub use error::SessionError;
pub use media::MediaPlatform;
pub use session::{
    SessionEvent, SessionEventKind, SessionPhase, StartRequest, VoiceProfile, VoiceSessionManager,
};
pub use sink::AudioSinkController;

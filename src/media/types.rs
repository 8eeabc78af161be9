use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::platform::RemoteAudioTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// 协商描述符，应用后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer<S: Into<String>>(sdp: S) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer<S: Into<String>>(sdp: S) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// STUN/TURN 会合服务器。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun<S: Into<String>>(url: S) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

/// 采集设备约束，回声消除、降噪与自动增益为基线要求。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub device_id: Option<String>,
    pub channel_count: u16,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            device_id: None,
            channel_count: 1,
        }
    }
}

impl AudioConstraints {
    pub fn meets_baseline(&self) -> bool {
        self.echo_cancellation && self.noise_suppression && self.auto_gain_control
    }

    pub fn with_baseline(mut self) -> Self {
        self.echo_cancellation = true;
        self.noise_suppression = true;
        self.auto_gain_control = true;
        self
    }
}

/// 平台媒体栈推送的异步通知，单一有序队列。
#[derive(Clone)]
pub enum PeerEvent {
    ConnectionState(PeerConnectionState),
    RemoteTrack(Arc<dyn RemoteAudioTrack>),
    ChannelOpen,
    ChannelClose,
    ChannelMessage(String),
    ChannelError(String),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::ConnectionState(state) => {
                f.debug_tuple("ConnectionState").field(state).finish()
            }
            PeerEvent::RemoteTrack(track) => f.debug_tuple("RemoteTrack").field(&track.id()).finish(),
            PeerEvent::ChannelOpen => f.write_str("ChannelOpen"),
            PeerEvent::ChannelClose => f.write_str("ChannelClose"),
            PeerEvent::ChannelMessage(raw) => {
                f.debug_tuple("ChannelMessage").field(&raw.len()).finish()
            }
            PeerEvent::ChannelError(message) => {
                f.debug_tuple("ChannelError").field(message).finish()
            }
        }
    }
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

pub fn peer_event_channel() -> (PeerEventSender, PeerEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_forced_on() {
        let constraints = AudioConstraints {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: true,
            device_id: Some("usb-mic".into()),
            channel_count: 1,
        };
        assert!(!constraints.meets_baseline());

        let forced = constraints.with_baseline();
        assert!(forced.meets_baseline());
        assert_eq!(forced.device_id.as_deref(), Some("usb-mic"));
    }

    #[test]
    fn ice_server_serializes_without_empty_credentials() {
        let server = IceServer::stun("stun:stun.l.google.com:19302");
        let json = serde_json::to_value(&server).expect("serialize ice server");
        assert_eq!(
            json,
            serde_json::json!({ "urls": ["stun:stun.l.google.com:19302"] })
        );
    }
}

//! 平台媒体栈边界：采集、对等连接、数据通道与音频输出。

pub mod error;
pub mod platform;
pub mod types;

pub use error::{CaptureError, MediaError};
pub use platform::{
    AudioOutput, DataChannel, LocalAudioTrack, MediaPlatform, PeerConnection, RemoteAudioTrack,
};
pub use types::{
    peer_event_channel, AudioConstraints, ChannelState, IceServer, PeerConfig,
    PeerConnectionState, PeerEvent, PeerEventReceiver, PeerEventSender, SdpKind,
    SessionDescription,
};

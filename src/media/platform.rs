use std::sync::Arc;

use async_trait::async_trait;

use super::error::{CaptureError, MediaError};
use super::types::{
    AudioConstraints, ChannelState, PeerConfig, PeerConnectionState, PeerEventSender,
    SessionDescription,
};

/// 平台媒体栈的唯一能力接口，所有方法均为必需实现。
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    async fn open_audio_input(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn LocalAudioTrack>, CaptureError>;

    async fn create_peer_connection(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, MediaError>;

    fn create_audio_output(&self) -> Arc<dyn AudioOutput>;
}

pub trait LocalAudioTrack: Send + Sync {
    fn id(&self) -> String;

    fn label(&self) -> String;

    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// 释放设备，调用后设备占用指示应立即熄灭。
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

pub trait RemoteAudioTrack: Send + Sync {
    fn id(&self) -> String;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn add_track(&self, track: Arc<dyn LocalAudioTrack>) -> Result<(), MediaError>;

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, MediaError>;

    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), MediaError>;

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), MediaError>;

    fn connection_state(&self) -> PeerConnectionState;

    fn close(&self);
}

pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    fn state(&self) -> ChannelState;

    fn send_text(&self, payload: &str) -> Result<(), MediaError>;

    fn close(&self);
}

pub trait AudioOutput: Send + Sync {
    fn attach(&self, track: Arc<dyn RemoteAudioTrack>);

    fn detach(&self);

    fn set_volume(&self, volume: f32);

    fn set_muted(&self, muted: bool);
}

//! 麦克风采集。

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::SessionError;
use crate::media::{AudioConstraints, CaptureError, LocalAudioTrack, MediaPlatform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionProbe {
    Granted,
    Denied,
    Unavailable,
}

/// 会话独占的本地采集轨道；对外暴露只读视图。
#[derive(Clone)]
pub struct CaptureSource {
    track: Arc<dyn LocalAudioTrack>,
}

impl fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSource")
            .field("track_id", &self.track.id())
            .field("enabled", &self.track.is_enabled())
            .field("stopped", &self.track.is_stopped())
            .finish()
    }
}

impl CaptureSource {
    pub fn track_id(&self) -> String {
        self.track.id()
    }

    pub fn label(&self) -> String {
        self.track.label()
    }

    pub fn is_enabled(&self) -> bool {
        self.track.is_enabled()
    }

    pub fn is_stopped(&self) -> bool {
        self.track.is_stopped()
    }

    pub(crate) fn track(&self) -> Arc<dyn LocalAudioTrack> {
        Arc::clone(&self.track)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.track.set_enabled(enabled);
    }

    pub(crate) fn stop(&self) {
        if !self.track.is_stopped() {
            self.track.stop();
        }
    }
}

pub struct CaptureAcquirer {
    platform: Arc<dyn MediaPlatform>,
    constraints: AudioConstraints,
}

impl CaptureAcquirer {
    pub fn new(platform: Arc<dyn MediaPlatform>, constraints: AudioConstraints) -> Self {
        if !constraints.meets_baseline() {
            warn!(
                target: "capture",
                echo_cancellation = constraints.echo_cancellation,
                noise_suppression = constraints.noise_suppression,
                auto_gain_control = constraints.auto_gain_control,
                "capture processing baseline is mandatory; overriding configuration"
            );
        }
        Self {
            platform,
            constraints: constraints.with_baseline(),
        }
    }

    pub fn constraints(&self) -> &AudioConstraints {
        &self.constraints
    }

    pub async fn acquire(&self) -> Result<CaptureSource, SessionError> {
        let track = self
            .platform
            .open_audio_input(&self.constraints)
            .await
            .map_err(|err| {
                warn!(target: "capture", %err, "failed to open audio input");
                SessionError::from(err)
            })?;

        if track.is_stopped() {
            warn!(
                target: "capture",
                track_id = %track.id(),
                "platform returned an already stopped track"
            );
            return Err(SessionError::device_unavailable(
                "audio input ended before it could be used",
            ));
        }

        info!(
            target: "capture",
            track_id = %track.id(),
            label = %track.label(),
            "audio capture acquired"
        );
        Ok(CaptureSource { track })
    }

    /// 预检麦克风权限：打开设备后立即释放。
    pub async fn probe_permission(&self) -> PermissionProbe {
        match self.platform.open_audio_input(&self.constraints).await {
            Ok(track) => {
                track.stop();
                PermissionProbe::Granted
            }
            Err(CaptureError::PermissionDenied { message }) => {
                info!(target: "capture", %message, "microphone permission denied");
                PermissionProbe::Denied
            }
            Err(CaptureError::DeviceUnavailable { message }) => {
                info!(target: "capture", %message, "no microphone available");
                PermissionProbe::Unavailable
            }
        }
    }
}

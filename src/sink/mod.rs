//! 远端音频播放控制。

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::media::{AudioOutput, RemoteAudioTrack};

struct SinkState {
    output: Arc<dyn AudioOutput>,
    attached: Option<String>,
    volume: f32,
    muted: bool,
    released: bool,
}

/// 每个会话独立的播放输出；音量与静音设置在挂载时回放到输出上。
#[derive(Clone)]
pub struct AudioSinkController {
    session_id: Arc<str>,
    state: Arc<Mutex<SinkState>>,
}

impl std::fmt::Debug for AudioSinkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSinkController")
            .field("session_id", &self.session_id)
            .field("attached", &self.attached_track())
            .field("volume", &self.volume())
            .field("muted", &self.is_muted())
            .finish()
    }
}

impl AudioSinkController {
    pub(crate) fn new(session_id: &str, output: Arc<dyn AudioOutput>, volume: f32) -> Self {
        Self {
            session_id: Arc::from(session_id),
            state: Arc::new(Mutex::new(SinkState {
                output,
                attached: None,
                volume: clamp_volume(volume),
                muted: false,
                released: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 仅挂载首条远端轨道，返回是否挂载成功。
    pub(crate) fn attach(&self, track: Arc<dyn RemoteAudioTrack>) -> bool {
        let mut state = self.lock();
        let track_id = track.id();
        if state.released {
            debug!(
                target: "audio_sink",
                session_id = %self.session_id,
                %track_id,
                "ignoring remote track after release"
            );
            return false;
        }
        if let Some(current) = &state.attached {
            debug!(
                target: "audio_sink",
                session_id = %self.session_id,
                %track_id,
                current = %current,
                "ignoring additional remote track"
            );
            return false;
        }

        state.output.attach(track);
        state.output.set_volume(state.volume);
        state.output.set_muted(state.muted);
        state.attached = Some(track_id.clone());
        info!(
            target: "audio_sink",
            session_id = %self.session_id,
            %track_id,
            volume = state.volume,
            muted = state.muted,
            "remote audio attached"
        );
        true
    }

    /// 设置音量（0..=1，越界截断，NaN 视为 0），返回实际生效值。
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        let mut state = self.lock();
        if state.released {
            return state.volume;
        }
        state.volume = volume;
        state.output.set_volume(volume);
        volume
    }

    pub fn set_muted(&self, muted: bool) {
        let mut state = self.lock();
        if state.released {
            return;
        }
        state.muted = muted;
        state.output.set_muted(muted);
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    pub fn attached_track(&self) -> Option<String> {
        self.lock().attached.clone()
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    pub(crate) fn release(&self) {
        let mut state = self.lock();
        if state.released {
            return;
        }
        state.output.detach();
        state.attached = None;
        state.released = true;
        debug!(target: "audio_sink", session_id = %self.session_id, "audio sink released");
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

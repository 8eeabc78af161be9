//! 实时语音会话管理状态机。

pub mod events;
mod health;
mod state;
pub mod transcript;
mod types;


use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::capture::{CaptureAcquirer, CaptureSource, PermissionProbe};
use crate::config::RealtimeConfig;
use crate::control::{
    ClientEvent, ControlChannel, ControlMessage, SendGate, SendOutcome, ServerEvent,
    SuppressReason,
};
use crate::credential::{CredentialBroker, HttpCredentialBroker};
use crate::error::SessionError;
use crate::media::{
    peer_event_channel, DataChannel, MediaPlatform, PeerConnection, PeerConnectionState,
    PeerEvent, PeerEventReceiver,
};
use crate::negotiation::{HttpSdpExchange, NegotiationEngine, NegotiationStage, SdpExchange};
use crate::sink::AudioSinkController;
use crate::telemetry::events::{
    record_connection_lost, record_control_send, record_session_transition,
};

use self::events::EventEmitter;
use self::health::{ConnectionHealth, HealthVerdict};
use self::state::{LiveSession, SessionLink, SessionState, StartPhase};

pub use self::events::{channel, EventReceiver, EventSender, SessionEvent, SessionEventKind};
pub use self::state::SessionPhase;
pub use self::transcript::{Speaker, TranscriptEntry, TranscriptLog};
pub use self::types::{SessionInfo, StartRequest, VoiceProfile};

struct ManagerInner {
    config: RealtimeConfig,
    platform: Arc<dyn MediaPlatform>,
    broker: Arc<dyn CredentialBroker>,
    capture: CaptureAcquirer,
    negotiation: NegotiationEngine,
    state: Mutex<SessionState>,
    counter: AtomicU64,
}

/// 单个管理器同一时刻至多承载一个会话。
pub struct VoiceSessionManager {
    inner: Arc<ManagerInner>,
}

impl VoiceSessionManager {
    pub fn new(config: RealtimeConfig, platform: Arc<dyn MediaPlatform>) -> anyhow::Result<Self> {
        config.validate()?;
        let broker = Arc::new(HttpCredentialBroker::new(&config));
        let exchange = Arc::new(HttpSdpExchange::new(&config));
        Ok(Self::with_components(config, platform, broker, exchange))
    }

    pub fn with_components(
        config: RealtimeConfig,
        platform: Arc<dyn MediaPlatform>,
        broker: Arc<dyn CredentialBroker>,
        exchange: Arc<dyn SdpExchange>,
    ) -> Self {
        let capture = CaptureAcquirer::new(Arc::clone(&platform), config.audio.clone());
        let negotiation = NegotiationEngine::new(
            Arc::clone(&platform),
            exchange,
            config.peer_config(),
            config.control_channel_label.clone(),
        );

        Self {
            inner: Arc::new(ManagerInner {
                config,
                platform,
                broker,
                capture,
                negotiation,
                state: Mutex::new(SessionState::Idle),
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// 获取凭证、打开麦克风并完成协商；控制通道打开后会话进入 active。
    pub async fn start(
        &self,
        request: StartRequest,
        events: EventSender,
    ) -> Result<(), SessionError> {
        let info = {
            let mut state = self.inner.lock();
            if !matches!(*state, SessionState::Idle) {
                let phase = state.phase();
                warn!(
                    target: "session_manager",
                    phase = phase.as_str(),
                    "rejecting start while a session is not idle"
                );
                return Err(SessionError::SessionAlreadyActive { phase });
            }

            let info = SessionInfo::new(self.inner.next_session_id(), request);
            let mut emitter = EventEmitter::new(&info.id, events);
            transition(
                &mut emitter,
                &info.id,
                SessionPhase::Idle,
                SessionPhase::Starting,
                None,
            );
            *state = SessionState::Starting {
                info: info.clone(),
                events: emitter,
                phase: StartPhase::Negotiating,
            };
            info
        };

        let mut attempt = StartAttempt::new(&self.inner, &info.id);

        let credential = match self.inner.broker.fetch_credential(&info.voice).await {
            Ok(credential) => credential,
            Err(err) => return attempt.fail(err),
        };
        attempt.ensure_current()?;

        let capture = match self.inner.capture.acquire().await {
            Ok(capture) => capture,
            Err(err) => return attempt.fail(err),
        };
        attempt.capture = Some(capture.clone());
        attempt.ensure_current()?;

        let (peer_tx, peer_rx) = peer_event_channel();
        let negotiated = match self
            .inner
            .negotiation
            .negotiate(&info.id, credential, &capture, peer_tx)
            .await
        {
            Ok(negotiated) => negotiated,
            Err(err) => return attempt.fail(err),
        };
        attempt.peer = Some((
            Arc::clone(&negotiated.peer),
            Arc::clone(&negotiated.channel),
        ));
        attempt.ensure_current()?;

        let sink = AudioSinkController::new(
            &info.id,
            self.inner.platform.create_audio_output(),
            self.inner.config.default_volume,
        );
        let control = Arc::new(ControlChannel::new(
            info.id.clone(),
            Arc::clone(&negotiated.channel),
        ));

        let mut state = self.inner.lock();
        if !attempt.is_current(&state) {
            drop(state);
            return attempt.cancelled();
        }
        if let SessionState::Starting { phase, .. } = &mut *state {
            let relay = tokio::spawn(relay_peer_events(
                Arc::downgrade(&self.inner),
                info.id.clone(),
                peer_rx,
            ));
            *phase = StartPhase::AwaitingChannel(SessionLink {
                capture,
                peer: negotiated.peer,
                control,
                sink,
                health: ConnectionHealth::new(),
                relay: Some(relay),
            });
        }
        attempt.settle();
        drop(state);

        info!(
            target: "session_manager",
            session_id = %info.id,
            voice = info.voice.as_str(),
            "negotiation complete; awaiting control channel"
        );
        Ok(())
    }

    /// 暂停只禁用本地采集轨道，连接与通道保持不变。
    pub fn pause(&self) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        match mem::replace(&mut *state, SessionState::Closed) {
            SessionState::Active(mut live) => {
                live.link.capture.set_enabled(false);
                transition(
                    &mut live.events,
                    &live.info.id,
                    SessionPhase::Active,
                    SessionPhase::Paused,
                    Some("pause"),
                );
                *state = SessionState::Paused(live);
                Ok(())
            }
            paused @ SessionState::Paused(_) => {
                *state = paused;
                Ok(())
            }
            other => {
                let phase = other.phase();
                *state = other;
                Err(SessionError::InvalidTransition {
                    operation: "pause",
                    phase,
                })
            }
        }
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        match mem::replace(&mut *state, SessionState::Closed) {
            SessionState::Paused(mut live) => {
                live.link.capture.set_enabled(true);
                transition(
                    &mut live.events,
                    &live.info.id,
                    SessionPhase::Paused,
                    SessionPhase::Active,
                    Some("resume"),
                );
                *state = SessionState::Active(live);
                Ok(())
            }
            active @ SessionState::Active(_) => {
                *state = active;
                Ok(())
            }
            other => {
                let phase = other.phase();
                *state = other;
                Err(SessionError::InvalidTransition {
                    operation: "resume",
                    phase,
                })
            }
        }
    }

    /// 幂等；进行中的启动会被取消。
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        close_session(&mut state, "stop");
    }

    pub fn send(&self, message: ControlMessage) -> Result<SendOutcome, SessionError> {
        let state = self.inner.lock();
        let (live, gate) = match &*state {
            SessionState::Active(live) => (live, SendGate::Open),
            SessionState::Paused(live) => (live, SendGate::Paused),
            other => {
                let reason = match other {
                    SessionState::Starting { .. } => SuppressReason::ChannelNotOpen,
                    _ => SuppressReason::SessionInactive,
                };
                let session_id = other.info().map(|info| info.id.as_str()).unwrap_or("");
                debug!(
                    target: "session_manager",
                    session_id,
                    phase = other.phase().as_str(),
                    message_type = message.message_type(),
                    "suppressing send outside a live session"
                );
                record_control_send(session_id, message.message_type(), reason.as_str());
                return Ok(SendOutcome::Suppressed(reason));
            }
        };
        live.link.control.send(&message, gate)
    }

    pub fn audio_sink(&self) -> Option<AudioSinkController> {
        self.inner.lock().link().map(|link| link.sink.clone())
    }

    pub fn capture_source(&self) -> Option<CaptureSource> {
        self.inner.lock().link().map(|link| link.capture.clone())
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.inner.lock().info().cloned()
    }

    /// 仅在 error 阶段返回导致失败的错误。
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.lock().error().cloned()
    }

    pub async fn probe_microphone(&self) -> PermissionProbe {
        self.inner.capture.probe_permission().await
    }

    /// closed 或 error 之后回到 idle，以便承载新会话。
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        match state.phase() {
            SessionPhase::Idle => Ok(()),
            SessionPhase::Closed | SessionPhase::Error => {
                *state = SessionState::Idle;
                debug!(target: "session_manager", "session manager reset to idle");
                Ok(())
            }
            phase => Err(SessionError::InvalidTransition {
                operation: "reset",
                phase,
            }),
        }
    }
}

impl Drop for VoiceSessionManager {
    fn drop(&mut self) {
        if self.phase().is_live() {
            self.stop();
        }
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_session_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0);
        let serial = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("rt-{millis}-{serial}")
    }

    /// 返回 false 时中继任务退出。
    fn handle_peer_event(&self, session_id: &str, event: PeerEvent) -> bool {
        let mut state = self.lock();
        if !state.is_session(session_id) || state.link().is_none() {
            debug!(
                target: "session_manager",
                session_id,
                ?event,
                "dropping peer event for inactive session"
            );
            return false;
        }

        match event {
            PeerEvent::ConnectionState(connection) => {
                self.on_connection_state(&mut state, session_id, connection)
            }
            PeerEvent::RemoteTrack(track) => {
                if let Some((events, link)) = state.link_mut() {
                    let track_id = track.id();
                    if link.sink.attach(track) {
                        events.emit(SessionEventKind::RemoteAudioAttached { track_id });
                    }
                }
                true
            }
            PeerEvent::ChannelOpen => self.open_session(&mut state),
            PeerEvent::ChannelClose => {
                info!(target: "session_manager", session_id, "control channel closed by peer");
                if let Some((events, _)) = state.link_mut() {
                    events.emit(SessionEventKind::ChannelClosed);
                }
                let error = match &*state {
                    SessionState::Starting { .. } => SessionError::negotiation(
                        NegotiationStage::OpenControlChannel,
                        "control channel closed before opening",
                    ),
                    _ => SessionError::control("control channel closed by peer"),
                };
                fail_session(&mut state, error);
                false
            }
            PeerEvent::ChannelMessage(raw) => {
                relay_server_message(&mut state, session_id, &raw);
                true
            }
            PeerEvent::ChannelError(message) => {
                fail_session(&mut state, SessionError::control(message));
                false
            }
        }
    }

    fn on_connection_state(
        &self,
        state: &mut SessionState,
        session_id: &str,
        connection: PeerConnectionState,
    ) -> bool {
        let verdict = {
            let Some((events, link)) = state.link_mut() else {
                return false;
            };
            events.emit(SessionEventKind::ConnectionState(connection));
            let verdict = link.health.observe(connection);
            debug!(
                target: "session_manager",
                session_id,
                state = link.health.last().as_str(),
                transitions = link.health.transitions(),
                "peer connection state changed"
            );
            if verdict == HealthVerdict::Lost {
                record_connection_lost(
                    session_id,
                    connection.as_str(),
                    link.health.transitions(),
                    link.health.connected_for(),
                );
            }
            verdict
        };

        match verdict {
            HealthVerdict::Healthy => true,
            HealthVerdict::Lost => {
                fail_session(state, SessionError::ConnectionLost { state: connection });
                false
            }
            HealthVerdict::NeverConnected => {
                fail_session(
                    state,
                    SessionError::negotiation(
                        NegotiationStage::Connectivity,
                        format!("peer connection {connection} before connecting"),
                    ),
                );
                false
            }
        }
    }

    /// 通道打开后先下发开场 `response.create`，再进入 active。
    fn open_session(&self, state: &mut SessionState) -> bool {
        let (info, mut events, link) = match mem::replace(state, SessionState::Closed) {
            SessionState::Starting {
                info,
                events,
                phase: StartPhase::AwaitingChannel(link),
            } => (info, events, link),
            other => {
                debug!(
                    target: "session_manager",
                    phase = other.phase().as_str(),
                    "ignoring duplicate channel open"
                );
                *state = other;
                return true;
            }
        };

        let opening: ControlMessage = ClientEvent::response_create(
            self.config.modalities.clone(),
            info.instructions.clone(),
        )
        .into();

        let failure = match link.control.send(&opening, SendGate::Open) {
            Ok(SendOutcome::Sent) => None,
            Ok(SendOutcome::Suppressed(reason)) => Some(SessionError::control(format!(
                "opening directive suppressed: {}",
                reason.as_str()
            ))),
            Err(err) => Some(err),
        };

        match failure {
            None => {
                events.emit(SessionEventKind::ChannelOpened);
                transition(
                    &mut events,
                    &info.id,
                    SessionPhase::Starting,
                    SessionPhase::Active,
                    None,
                );
                *state = SessionState::Active(LiveSession { info, events, link });
                true
            }
            Some(error) => {
                *state = SessionState::Starting {
                    info,
                    events,
                    phase: StartPhase::AwaitingChannel(link),
                };
                fail_session(state, error);
                false
            }
        }
    }
}

async fn relay_peer_events(
    inner: Weak<ManagerInner>,
    session_id: String,
    mut events: PeerEventReceiver,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = inner.upgrade() else {
            break;
        };
        if !manager.handle_peer_event(&session_id, event) {
            break;
        }
    }
    debug!(target: "session_manager", %session_id, "peer event relay finished");
}

fn relay_server_message(state: &mut SessionState, session_id: &str, raw: &str) {
    let live = match state {
        SessionState::Active(live) | SessionState::Paused(live) => live,
        _ => {
            debug!(
                target: "session_manager",
                session_id,
                "dropping control message received before channel open"
            );
            return;
        }
    };

    match ServerEvent::parse(raw) {
        Ok(event) => {
            if let ServerEvent::Error { code, message } = &event {
                warn!(
                    target: "session_manager",
                    session_id,
                    code = code.as_deref().unwrap_or(""),
                    %message,
                    "realtime service reported an error"
                );
            }
            live.events.emit(SessionEventKind::Server(event));
        }
        Err(err) => warn!(
            target: "session_manager",
            session_id,
            %err,
            "skipping malformed control message"
        ),
    }
}

fn transition(
    events: &mut EventEmitter,
    session_id: &str,
    from: SessionPhase,
    to: SessionPhase,
    reason: Option<&'static str>,
) {
    record_session_transition(session_id, from.as_str(), to.as_str(), reason);
    info!(
        target: "session_manager",
        session_id,
        from = from.as_str(),
        to = to.as_str(),
        "session transition"
    );
    events.emit(SessionEventKind::StateChanged(to));
}

/// 先释放资源，再发出唯一的错误事件并进入 error。
fn fail_session(state: &mut SessionState, error: SessionError) {
    let from = state.phase();
    let (info, mut events, link) = match mem::replace(state, SessionState::Closed) {
        SessionState::Starting {
            info,
            events,
            phase,
        } => {
            let link = match phase {
                StartPhase::AwaitingChannel(link) => Some(link),
                StartPhase::Negotiating => None,
            };
            (info, events, link)
        }
        SessionState::Active(live) | SessionState::Paused(live) => {
            (live.info, live.events, Some(live.link))
        }
        other => {
            *state = other;
            return;
        }
    };

    if let Some(link) = link {
        link.teardown(&info.id, false);
    }
    warn!(
        target: "session_manager",
        session_id = %info.id,
        code = error.code(),
        %error,
        "voice session failed"
    );
    events.emit(SessionEventKind::Error(error.clone()));
    transition(
        &mut events,
        &info.id,
        from,
        SessionPhase::Error,
        Some(error.code()),
    );
    *state = SessionState::Error { info, error };
}

fn close_session(state: &mut SessionState, reason: &'static str) {
    let from = state.phase();
    match mem::replace(state, SessionState::Closed) {
        SessionState::Closed => {
            debug!(target: "session_manager", "session already closed");
        }
        SessionState::Idle => {
            debug!(target: "session_manager", "closing idle session manager");
        }
        SessionState::Error { info, .. } => {
            record_session_transition(&info.id, from.as_str(), "closed", Some(reason));
        }
        SessionState::Starting {
            info,
            mut events,
            phase,
        } => {
            if let StartPhase::AwaitingChannel(link) = phase {
                link.teardown(&info.id, true);
            }
            transition(&mut events, &info.id, from, SessionPhase::Closed, Some(reason));
        }
        SessionState::Active(live) | SessionState::Paused(live) => {
            let LiveSession {
                info,
                mut events,
                link,
            } = live;
            link.teardown(&info.id, true);
            transition(&mut events, &info.id, from, SessionPhase::Closed, Some(reason));
        }
    }
}

/// 启动过程中尚未移交给状态机的资源。
struct StartAttempt<'a> {
    inner: &'a ManagerInner,
    session_id: &'a str,
    capture: Option<CaptureSource>,
    peer: Option<(Arc<dyn PeerConnection>, Arc<dyn DataChannel>)>,
    settled: bool,
}

impl<'a> StartAttempt<'a> {
    fn new(inner: &'a ManagerInner, session_id: &'a str) -> Self {
        Self {
            inner,
            session_id,
            capture: None,
            peer: None,
            settled: false,
        }
    }

    fn is_current(&self, state: &SessionState) -> bool {
        matches!(
            state,
            SessionState::Starting { info, .. } if info.id == self.session_id
        )
    }

    fn release(&mut self) {
        if let Some((peer, channel)) = self.peer.take() {
            channel.close();
            peer.close();
        }
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
    }

    fn settle(&mut self) {
        self.capture = None;
        self.peer = None;
        self.settled = true;
    }

    fn ensure_current(&mut self) -> Result<(), SessionError> {
        let inner = self.inner;
        let current = self.is_current(&inner.lock());
        if current {
            Ok(())
        } else {
            self.cancelled()
        }
    }

    fn cancelled<T>(&mut self) -> Result<T, SessionError> {
        self.release();
        self.settled = true;
        info!(
            target: "session_manager",
            session_id = self.session_id,
            "session start cancelled"
        );
        Err(SessionError::Cancelled)
    }

    fn fail<T>(&mut self, error: SessionError) -> Result<T, SessionError> {
        self.release();
        let inner = self.inner;
        let mut state = inner.lock();
        if !self.is_current(&state) {
            drop(state);
            return self.cancelled();
        }
        fail_session(&mut state, error.clone());
        self.settled = true;
        Err(error)
    }
}

impl Drop for StartAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.release();
        let mut state = self.inner.lock();
        if self.is_current(&state) {
            warn!(
                target: "session_manager",
                session_id = self.session_id,
                "session start abandoned before completion"
            );
            close_session(&mut state, "abandoned");
        }
    }
}

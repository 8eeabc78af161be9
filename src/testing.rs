//! 单元测试共用的平台替身。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::credential::{Credential, CredentialBroker};
use crate::error::SessionError;
use crate::media::{
    AudioConstraints, AudioOutput, CaptureError, ChannelState, DataChannel, LocalAudioTrack,
    MediaError, MediaPlatform, PeerConfig, PeerConnection, PeerConnectionState, PeerEvent,
    PeerEventSender, RemoteAudioTrack, SessionDescription,
};
use crate::negotiation::SdpExchange;
use crate::session::VoiceProfile;

pub(crate) const FAKE_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=fake-offer\r\n";
pub(crate) const FAKE_ANSWER: &str = "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\ns=fake-answer\r\n";

pub(crate) struct FakeTrack {
    id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
    toggles: AtomicUsize,
}

impl FakeTrack {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            toggles: AtomicUsize::new(0),
        }
    }

    pub(crate) fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn toggles(&self) -> usize {
        self.toggles.load(Ordering::SeqCst)
    }
}

impl LocalAudioTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> String {
        format!("Fake microphone ({})", self.id)
    }

    fn set_enabled(&self, enabled: bool) {
        self.toggles.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeRemoteTrack {
    id: String,
}

impl FakeRemoteTrack {
    pub(crate) fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl RemoteAudioTrack for FakeRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }
}

pub(crate) struct FakeDataChannel {
    label: String,
    state: Mutex<ChannelState>,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    fail_sends: AtomicBool,
}

impl FakeDataChannel {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        *self.state.lock().expect("channel state lock poisoned") = state;
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock poisoned").len()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl DataChannel for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state lock poisoned")
    }

    fn send_text(&self, payload: &str) -> Result<(), MediaError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MediaError::platform("send buffer rejected message"));
        }
        if self.state() != ChannelState::Open {
            return Err(MediaError::Closed);
        }
        self.sent
            .lock()
            .expect("sent lock poisoned")
            .push(payload.to_string());
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.set_state(ChannelState::Closed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerStep {
    AddTrack,
    CreateChannel,
    CreateOffer,
    SetLocal,
    SetRemote,
}

pub(crate) struct FakePeer {
    events: PeerEventSender,
    fail_at: Option<PeerStep>,
    channel: Mutex<Option<Arc<FakeDataChannel>>>,
    steps: Mutex<Vec<PeerStep>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    state: Mutex<PeerConnectionState>,
    close_calls: AtomicUsize,
}

impl FakePeer {
    fn new(events: PeerEventSender, fail_at: Option<PeerStep>) -> Self {
        Self {
            events,
            fail_at,
            channel: Mutex::new(None),
            steps: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            state: Mutex::new(PeerConnectionState::New),
            close_calls: AtomicUsize::new(0),
        }
    }

    fn step(&self, step: PeerStep) -> Result<(), MediaError> {
        self.steps.lock().expect("steps lock poisoned").push(step);
        if self.fail_at == Some(step) {
            return Err(MediaError::platform(format!("{step:?} rejected")));
        }
        Ok(())
    }

    pub(crate) fn steps(&self) -> Vec<PeerStep> {
        self.steps.lock().expect("steps lock poisoned").clone()
    }

    pub(crate) fn data_channel(&self) -> Arc<FakeDataChannel> {
        self.channel
            .lock()
            .expect("channel lock poisoned")
            .clone()
            .expect("data channel created")
    }

    pub(crate) fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().expect("local lock poisoned").clone()
    }

    pub(crate) fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().expect("remote lock poisoned").clone()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn open_channel(&self) {
        self.data_channel().set_state(ChannelState::Open);
        self.emit(PeerEvent::ChannelOpen);
    }

    pub(crate) fn set_connection(&self, state: PeerConnectionState) {
        *self.state.lock().expect("state lock poisoned") = state;
        self.emit(PeerEvent::ConnectionState(state));
    }

    pub(crate) fn deliver(&self, raw: &str) {
        self.emit(PeerEvent::ChannelMessage(raw.to_string()));
    }

    pub(crate) fn remote_track(&self, id: &str) {
        self.emit(PeerEvent::RemoteTrack(Arc::new(FakeRemoteTrack::new(id))));
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    fn add_track(&self, _track: Arc<dyn LocalAudioTrack>) -> Result<(), MediaError> {
        self.step(PeerStep::AddTrack)
    }

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, MediaError> {
        self.step(PeerStep::CreateChannel)?;
        let channel = Arc::new(FakeDataChannel::new(label));
        *self.channel.lock().expect("channel lock poisoned") = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.step(PeerStep::CreateOffer)?;
        Ok(SessionDescription::offer(FAKE_OFFER))
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), MediaError> {
        self.step(PeerStep::SetLocal)?;
        *self.local.lock().expect("local lock poisoned") = Some(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), MediaError> {
        self.step(PeerStep::SetRemote)?;
        *self.remote.lock().expect("remote lock poisoned") = Some(description.clone());
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().expect("state lock poisoned") = PeerConnectionState::Closed;
    }
}

#[derive(Default)]
pub(crate) struct FakeOutput {
    attached: Mutex<Option<String>>,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
    volume: Mutex<Option<f32>>,
    muted: AtomicBool,
}

impl FakeOutput {
    pub(crate) fn attached(&self) -> Option<String> {
        self.attached.lock().expect("attached lock poisoned").clone()
    }

    pub(crate) fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn detach_calls(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn volume(&self) -> Option<f32> {
        *self.volume.lock().expect("volume lock poisoned")
    }

    pub(crate) fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn attach(&self, track: Arc<dyn RemoteAudioTrack>) {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        *self.attached.lock().expect("attached lock poisoned") = Some(track.id());
    }

    fn detach(&self) {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        *self.attached.lock().expect("attached lock poisoned") = None;
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock().expect("volume lock poisoned") = Some(volume);
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureBehavior {
    Grant,
    Deny,
    NoDevice,
    GrantStopped,
}

pub(crate) struct FakePlatform {
    capture: Mutex<CaptureBehavior>,
    peer_fail_at: Mutex<Option<PeerStep>>,
    fail_peer_creation: AtomicBool,
    input_requests: AtomicUsize,
    constraints: Mutex<Vec<AudioConstraints>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    peer_configs: Mutex<Vec<PeerConfig>>,
    outputs: Mutex<Vec<Arc<FakeOutput>>>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self {
            capture: Mutex::new(CaptureBehavior::Grant),
            peer_fail_at: Mutex::new(None),
            fail_peer_creation: AtomicBool::new(false),
            input_requests: AtomicUsize::new(0),
            constraints: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            peer_configs: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_capture(&self, behavior: CaptureBehavior) {
        *self.capture.lock().expect("capture lock poisoned") = behavior;
    }

    pub(crate) fn fail_peer_at(&self, step: PeerStep) {
        *self.peer_fail_at.lock().expect("peer fail lock poisoned") = Some(step);
    }

    pub(crate) fn fail_peer_creation(&self) {
        self.fail_peer_creation.store(true, Ordering::SeqCst);
    }

    pub(crate) fn input_requests(&self) -> usize {
        self.input_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn constraints_seen(&self) -> Vec<AudioConstraints> {
        self.constraints.lock().expect("constraints lock poisoned").clone()
    }

    pub(crate) fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().expect("tracks lock poisoned").clone()
    }

    pub(crate) fn last_track(&self) -> Arc<FakeTrack> {
        self.tracks().last().cloned().expect("a track was opened")
    }

    pub(crate) fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().expect("peers lock poisoned").clone()
    }

    pub(crate) fn last_peer(&self) -> Arc<FakePeer> {
        self.peers().last().cloned().expect("a peer was created")
    }

    pub(crate) fn peer_configs(&self) -> Vec<PeerConfig> {
        self.peer_configs.lock().expect("configs lock poisoned").clone()
    }

    pub(crate) fn outputs(&self) -> Vec<Arc<FakeOutput>> {
        self.outputs.lock().expect("outputs lock poisoned").clone()
    }

    pub(crate) fn last_output(&self) -> Arc<FakeOutput> {
        self.outputs().last().cloned().expect("an output was created")
    }
}

#[async_trait]
impl MediaPlatform for FakePlatform {
    async fn open_audio_input(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn LocalAudioTrack>, CaptureError> {
        let serial = self.input_requests.fetch_add(1, Ordering::SeqCst) + 1;
        self.constraints
            .lock()
            .expect("constraints lock poisoned")
            .push(constraints.clone());

        let behavior = *self.capture.lock().expect("capture lock poisoned");
        match behavior {
            CaptureBehavior::Deny => Err(CaptureError::permission_denied("user dismissed prompt")),
            CaptureBehavior::NoDevice => Err(CaptureError::device_unavailable("no input devices")),
            CaptureBehavior::Grant | CaptureBehavior::GrantStopped => {
                let track = Arc::new(FakeTrack::new(&format!("mic-{serial}")));
                if behavior == CaptureBehavior::GrantStopped {
                    track.stop();
                }
                self.tracks
                    .lock()
                    .expect("tracks lock poisoned")
                    .push(track.clone());
                Ok(track)
            }
        }
    }

    async fn create_peer_connection(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, MediaError> {
        self.peer_configs
            .lock()
            .expect("configs lock poisoned")
            .push(config.clone());
        if self.fail_peer_creation.load(Ordering::SeqCst) {
            return Err(MediaError::platform("peer connection factory unavailable"));
        }

        let fail_at = *self.peer_fail_at.lock().expect("peer fail lock poisoned");
        let peer = Arc::new(FakePeer::new(events, fail_at));
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .push(peer.clone());
        Ok(peer)
    }

    fn create_audio_output(&self) -> Arc<dyn AudioOutput> {
        let output = Arc::new(FakeOutput::default());
        self.outputs
            .lock()
            .expect("outputs lock poisoned")
            .push(output.clone());
        output
    }
}

enum BrokerReply {
    Token(String),
    Fail(SessionError),
}

pub(crate) struct StaticBroker {
    reply: BrokerReply,
    calls: AtomicUsize,
    voices: Mutex<Vec<String>>,
}

impl StaticBroker {
    pub(crate) fn granting(token: &str) -> Self {
        Self {
            reply: BrokerReply::Token(token.to_string()),
            calls: AtomicUsize::new(0),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(error: SessionError) -> Self {
        Self {
            reply: BrokerReply::Fail(error),
            calls: AtomicUsize::new(0),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn voices(&self) -> Vec<String> {
        self.voices.lock().expect("voices lock poisoned").clone()
    }
}

#[async_trait]
impl CredentialBroker for StaticBroker {
    async fn fetch_credential(&self, voice: &VoiceProfile) -> Result<Credential, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.voices
            .lock()
            .expect("voices lock poisoned")
            .push(voice.as_str().to_string());
        match &self.reply {
            BrokerReply::Token(token) => Ok(Credential::new(token.clone(), None)),
            BrokerReply::Fail(error) => Err(error.clone()),
        }
    }
}

pub(crate) struct StaticExchange {
    answer: std::result::Result<String, String>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    offers: Mutex<Vec<String>>,
    bearers: Mutex<Vec<String>>,
}

impl StaticExchange {
    pub(crate) fn answering(sdp: &str) -> Self {
        Self {
            answer: Ok(sdp.to_string()),
            gate: None,
            calls: AtomicUsize::new(0),
            offers: Mutex::new(Vec::new()),
            bearers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            ..Self::answering("")
        }
    }

    /// 交换在 `Notify` 被触发前保持挂起。
    pub(crate) fn gated(sdp: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let exchange = Self {
            gate: Some(gate.clone()),
            ..Self::answering(sdp)
        };
        (exchange, gate)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn offers(&self) -> Vec<String> {
        self.offers.lock().expect("offers lock poisoned").clone()
    }

    pub(crate) fn bearers(&self) -> Vec<String> {
        self.bearers.lock().expect("bearers lock poisoned").clone()
    }
}

#[async_trait]
impl SdpExchange for StaticExchange {
    async fn exchange(&self, credential: &Credential, offer_sdp: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.offers
            .lock()
            .expect("offers lock poisoned")
            .push(offer_sdp.to_string());
        self.bearers
            .lock()
            .expect("bearers lock poisoned")
            .push(credential.secret().to_string());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.answer {
            Ok(sdp) => Ok(sdp.clone()),
            Err(message) => Err(anyhow!("{message}")),
        }
    }
}

/// 单次应答的本地 HTTP 服务，线程返回收到的完整请求文本。
pub(crate) fn one_shot_server(
    status_line: &str,
    content_type: &str,
    body: &str,
) -> (String, std::thread::JoinHandle<String>) {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
    let address = listener.local_addr().expect("local addr available");
    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept client");
        let mut received = Vec::new();
        let mut buffer = [0_u8; 1024];
        loop {
            let read = stream.read(&mut buffer).expect("read request");
            if read == 0 {
                break;
            }
            received.extend_from_slice(&buffer[..read]);
            if request_complete(&received) {
                break;
            }
        }
        stream
            .write_all(response.as_bytes())
            .expect("response written");
        String::from_utf8_lossy(&received).into_owned()
    });

    (format!("http://{address}/v1/endpoint"), handle)
}

fn request_complete(received: &[u8]) -> bool {
    let text = String::from_utf8_lossy(received);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    received.len() >= header_end + 4 + content_length
}

//! 对等连接协商：建立连接、挂载采集轨道、交换 offer/answer。

pub mod exchange;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::capture::CaptureSource;
use crate::credential::Credential;
use crate::error::SessionError;
use crate::media::{
    DataChannel, MediaPlatform, PeerConfig, PeerConnection, PeerEventSender, SessionDescription,
};
use crate::telemetry::events::record_negotiation_stage;

pub use exchange::{HttpSdpExchange, SdpExchange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationStage {
    OpenConnection,
    AttachTrack,
    OpenControlChannel,
    CreateOffer,
    ApplyLocalDescription,
    ExchangeOffer,
    ApplyRemoteDescription,
    /// 协商完成后连接从未建立即失败。
    Connectivity,
}

impl NegotiationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStage::OpenConnection => "open_connection",
            NegotiationStage::AttachTrack => "attach_track",
            NegotiationStage::OpenControlChannel => "open_control_channel",
            NegotiationStage::CreateOffer => "create_offer",
            NegotiationStage::ApplyLocalDescription => "apply_local_description",
            NegotiationStage::ExchangeOffer => "exchange_offer",
            NegotiationStage::ApplyRemoteDescription => "apply_remote_description",
            NegotiationStage::Connectivity => "connectivity",
        }
    }
}

impl fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct NegotiatedPeer {
    pub peer: Arc<dyn PeerConnection>,
    pub channel: Arc<dyn DataChannel>,
    pub offer: SessionDescription,
    pub answer: SessionDescription,
}

impl fmt::Debug for NegotiatedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedPeer")
            .field("connection_state", &self.peer.connection_state())
            .field("channel", &self.channel.label())
            .field("offer_bytes", &self.offer.sdp.len())
            .field("answer_bytes", &self.answer.sdp.len())
            .finish()
    }
}

pub struct NegotiationEngine {
    platform: Arc<dyn MediaPlatform>,
    exchange: Arc<dyn SdpExchange>,
    peer_config: PeerConfig,
    channel_label: String,
}

struct StageClock<'a> {
    session_id: &'a str,
    stage: NegotiationStage,
    started: Instant,
}

impl<'a> StageClock<'a> {
    fn start(session_id: &'a str, stage: NegotiationStage) -> Self {
        Self {
            session_id,
            stage,
            started: Instant::now(),
        }
    }

    fn succeed(self) {
        record_negotiation_stage(
            self.session_id,
            self.stage.as_str(),
            true,
            self.started.elapsed(),
        );
    }

    fn fail(self, peer: Option<&Arc<dyn PeerConnection>>, message: String) -> SessionError {
        record_negotiation_stage(
            self.session_id,
            self.stage.as_str(),
            false,
            self.started.elapsed(),
        );
        warn!(
            target: "negotiation",
            session_id = self.session_id,
            stage = self.stage.as_str(),
            %message,
            "negotiation stage failed"
        );
        if let Some(peer) = peer {
            peer.close();
        }
        SessionError::negotiation(self.stage, message)
    }
}

impl NegotiationEngine {
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        exchange: Arc<dyn SdpExchange>,
        peer_config: PeerConfig,
        channel_label: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            exchange,
            peer_config,
            channel_label: channel_label.into(),
        }
    }

    /// 按固定顺序执行各阶段，任一阶段失败即关闭已打开的连接，不重试。
    pub async fn negotiate(
        &self,
        session_id: &str,
        credential: Credential,
        capture: &CaptureSource,
        events: PeerEventSender,
    ) -> Result<NegotiatedPeer, SessionError> {
        let clock = StageClock::start(session_id, NegotiationStage::OpenConnection);
        if self
            .peer_config
            .ice_servers
            .iter()
            .all(|server| server.urls.is_empty())
        {
            return Err(clock.fail(None, "no STUN/TURN servers configured".into()));
        }
        let peer = match self
            .platform
            .create_peer_connection(&self.peer_config, events)
            .await
        {
            Ok(peer) => {
                clock.succeed();
                peer
            }
            Err(err) => return Err(clock.fail(None, err.to_string())),
        };

        let clock = StageClock::start(session_id, NegotiationStage::AttachTrack);
        match peer.add_track(capture.track()) {
            Ok(()) => clock.succeed(),
            Err(err) => return Err(clock.fail(Some(&peer), err.to_string())),
        }

        let clock = StageClock::start(session_id, NegotiationStage::OpenControlChannel);
        let channel = match peer.create_data_channel(&self.channel_label) {
            Ok(channel) => {
                clock.succeed();
                channel
            }
            Err(err) => return Err(clock.fail(Some(&peer), err.to_string())),
        };

        let clock = StageClock::start(session_id, NegotiationStage::CreateOffer);
        let offer = match peer.create_offer().await {
            Ok(offer) => {
                clock.succeed();
                offer
            }
            Err(err) => return Err(clock.fail(Some(&peer), err.to_string())),
        };

        let clock = StageClock::start(session_id, NegotiationStage::ApplyLocalDescription);
        match peer.set_local_description(&offer).await {
            Ok(()) => clock.succeed(),
            Err(err) => return Err(clock.fail(Some(&peer), err.to_string())),
        }

        let clock = StageClock::start(session_id, NegotiationStage::ExchangeOffer);
        if credential.is_expired() {
            return Err(clock.fail(Some(&peer), "credential expired before offer exchange".into()));
        }
        let answer_sdp = match self.exchange.exchange(&credential, &offer.sdp).await {
            Ok(answer) if answer.trim().is_empty() => {
                return Err(clock.fail(Some(&peer), "empty answer".into()));
            }
            Ok(answer) => {
                clock.succeed();
                answer
            }
            Err(err) => return Err(clock.fail(Some(&peer), format!("{err:#}"))),
        };
        drop(credential);

        let answer = SessionDescription::answer(answer_sdp);
        let clock = StageClock::start(session_id, NegotiationStage::ApplyRemoteDescription);
        match peer.set_remote_description(&answer).await {
            Ok(()) => clock.succeed(),
            Err(err) => return Err(clock.fail(Some(&peer), err.to_string())),
        }

        info!(
            target: "negotiation",
            session_id,
            channel = %channel.label(),
            "peer negotiation complete"
        );
        Ok(NegotiatedPeer {
            peer,
            channel,
            offer,
            answer,
        })
    }
}

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::control::Modality;
use crate::media::{AudioConstraints, IceServer, PeerConfig};

pub const ENV_TOKEN_URL: &str = "COUNSEL_REALTIME_TOKEN_URL";
pub const ENV_TOKEN_AUTH: &str = "COUNSEL_REALTIME_TOKEN_AUTH";
pub const ENV_BASE_URL: &str = "COUNSEL_REALTIME_BASE_URL";
pub const ENV_MODEL: &str = "COUNSEL_REALTIME_MODEL";
pub const ENV_ICE_SERVERS: &str = "COUNSEL_REALTIME_ICE_SERVERS";
pub const ENV_HTTP_TIMEOUT_MS: &str = "COUNSEL_REALTIME_HTTP_TIMEOUT_MS";

const DEFAULT_TOKEN_ENDPOINT: &str = "https://api.openai.com/v1/realtime/sessions";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/realtime";
const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_CHANNEL_LABEL: &str = "oai-events";

/// 实时语音会话配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// 后端令牌端点，长期密钥只保存在后端。
    pub token_endpoint: String,
    /// 令牌端点的 `Authorization` 头原文，例如 `Bearer <app-session>`。
    pub token_authorization: Option<String>,
    pub realtime_base_url: String,
    pub model: String,
    pub ice_servers: Vec<IceServer>,
    pub control_channel_label: String,
    pub modalities: Vec<Modality>,
    pub audio: AudioConstraints,
    pub http_timeout_ms: u64,
    pub default_volume: f32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            token_authorization: None,
            realtime_base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            control_channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            modalities: vec![Modality::Text, Modality::Audio],
            audio: AudioConstraints::default(),
            http_timeout_ms: 10_000,
            default_volume: 1.0,
        }
    }
}

impl RealtimeConfig {
    /// 读取可选的 JSON 配置文件，再叠加环境变量并校验。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).with_context(|| {
                    format!("failed to read realtime config: {}", path.display())
                })?;
                let parsed: RealtimeConfig = serde_json::from_str(&raw).with_context(|| {
                    format!("failed to parse realtime config: {}", path.display())
                })?;
                debug!(
                    target: "config",
                    path = %path.display(),
                    "loaded realtime config file"
                );
                parsed
            }
            None => RealtimeConfig::default(),
        };

        config.apply_env()?;
        config.validate()?;

        info!(
            target: "config",
            model = %config.model,
            token_endpoint = %config.token_endpoint,
            ice_servers = config.ice_servers.len(),
            "realtime config ready"
        );
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value(ENV_TOKEN_URL) {
            self.token_endpoint = value;
        }
        if let Some(value) = env_value(ENV_TOKEN_AUTH) {
            self.token_authorization = Some(value);
        }
        if let Some(value) = env_value(ENV_BASE_URL) {
            self.realtime_base_url = value;
        }
        if let Some(value) = env_value(ENV_MODEL) {
            self.model = value;
        }
        // 环境变量只能携带 STUN 地址；TURN 需要凭据，只能写在配置文件里。
        if let Some(value) = env_value(ENV_ICE_SERVERS) {
            let mut servers = Vec::new();
            for url in value.split(',').map(str::trim).filter(|url| !url.is_empty()) {
                if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                    bail!("{ENV_ICE_SERVERS} only accepts stun: urls, got `{url}`");
                }
                servers.push(IceServer::stun(url));
            }
            self.ice_servers = servers;
        }
        if let Some(value) = env_value(ENV_HTTP_TIMEOUT_MS) {
            self.http_timeout_ms = value
                .parse()
                .map_err(|err| anyhow!("invalid {ENV_HTTP_TIMEOUT_MS} value `{value}`: {err}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_endpoint.trim().is_empty() {
            bail!("token_endpoint must not be empty");
        }
        if self.realtime_base_url.trim().is_empty() {
            bail!("realtime_base_url must not be empty");
        }
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }
        if self.ice_servers.iter().all(|server| server.urls.is_empty()) {
            bail!("at least one STUN/TURN server is required");
        }
        if self.control_channel_label.trim().is_empty() {
            bail!("control_channel_label must not be empty");
        }
        if self.modalities.is_empty() {
            bail!("at least one response modality is required");
        }
        if self.http_timeout_ms == 0 {
            bail!("http_timeout_ms must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            bail!(
                "default_volume must be within 0..=1, got {}",
                self.default_volume
            );
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            ice_servers: self.ice_servers.clone(),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

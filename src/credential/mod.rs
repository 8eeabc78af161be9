//! 临时会话凭证的获取。

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RealtimeConfig;
use crate::error::SessionError;
use crate::http::{self, HttpFailure, PostRequest};
use crate::session::VoiceProfile;

/// 单次握手使用的短期密钥，不持久化、不复用。
pub struct Credential {
    value: String,
    expires_at: Option<SystemTime>,
}

impl Credential {
    pub fn new<S: Into<String>>(value: S, expires_at: Option<SystemTime>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| SystemTime::now() >= deadline)
            .unwrap_or(false)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn fetch_credential(&self, voice: &VoiceProfile) -> Result<Credential, SessionError>;
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    model: &'a str,
    voice: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    client_secret: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    #[serde(default)]
    value: String,
    #[serde(default)]
    expires_at: Option<u64>,
}

/// 通过后端令牌端点换取临时凭证，失败不重试。
pub struct HttpCredentialBroker {
    agent: ureq::Agent,
    endpoint: String,
    authorization: Option<String>,
    model: String,
}

impl HttpCredentialBroker {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            agent: http::build_agent(config.http_timeout()),
            endpoint: config.token_endpoint.clone(),
            authorization: config.token_authorization.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl CredentialBroker for HttpCredentialBroker {
    async fn fetch_credential(&self, voice: &VoiceProfile) -> Result<Credential, SessionError> {
        let body = serde_json::to_string(&TokenRequest {
            model: &self.model,
            voice: voice.as_str(),
        })
        .map_err(|err| SessionError::credential(None, format!("failed to encode request: {err}")))?;

        let request = PostRequest {
            url: self.endpoint.clone(),
            content_type: "application/json",
            authorization: self.authorization.clone(),
            body,
        };

        let response = http::post(&self.agent, request).await.map_err(|failure| {
            warn!(
                target: "credential_broker",
                endpoint = %self.endpoint,
                status = failure.status().unwrap_or(0),
                %failure,
                "credential request failed"
            );
            match failure {
                HttpFailure::Status { status, body } => {
                    SessionError::credential(Some(status), non_empty_or(body, "request rejected"))
                }
                HttpFailure::Transport { message } => SessionError::credential(None, message),
            }
        })?;

        let credential = parse_token_response(&response)?;
        info!(
            target: "credential_broker",
            voice = voice.as_str(),
            expires_in_s = credential
                .expires_at()
                .and_then(|deadline| deadline.duration_since(SystemTime::now()).ok())
                .map(|remaining| remaining.as_secs())
                .unwrap_or(0),
            "ephemeral credential issued"
        );
        Ok(credential)
    }
}

fn parse_token_response(raw: &str) -> Result<Credential, SessionError> {
    let parsed: TokenResponse = serde_json::from_str(raw).map_err(|err| {
        SessionError::credential(None, format!("malformed credential response: {err}"))
    })?;

    let secret = parsed
        .client_secret
        .filter(|secret| !secret.value.trim().is_empty())
        .ok_or_else(|| {
            SessionError::credential(None, "credential response missing client_secret.value")
        })?;

    let expires_at = secret
        .expires_at
        .map(|seconds| UNIX_EPOCH + Duration::from_secs(seconds));
    Ok(Credential::new(secret.value, expires_at))
}

fn non_empty_or(body: String, fallback: &str) -> String {
    if body.is_empty() {
        fallback.to_string()
    } else {
        body
    }
}

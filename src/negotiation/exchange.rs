use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::RealtimeConfig;
use crate::credential::Credential;
use crate::http::{self, PostRequest};

/// 提交本地 offer 并取回远端 answer 的信令通道。
#[async_trait]
pub trait SdpExchange: Send + Sync {
    async fn exchange(&self, credential: &Credential, offer_sdp: &str) -> Result<String>;
}

pub struct HttpSdpExchange {
    agent: ureq::Agent,
    url: String,
}

impl HttpSdpExchange {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            agent: http::build_agent(config.http_timeout()),
            url: format!(
                "{}?model={}",
                config.realtime_base_url.trim_end_matches('/'),
                config.model
            ),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SdpExchange for HttpSdpExchange {
    async fn exchange(&self, credential: &Credential, offer_sdp: &str) -> Result<String> {
        debug!(
            target: "negotiation",
            url = %self.url,
            offer_bytes = offer_sdp.len(),
            "posting offer"
        );
        let answer = http::post(
            &self.agent,
            PostRequest {
                url: self.url.clone(),
                content_type: "application/sdp",
                authorization: Some(format!("Bearer {}", credential.secret())),
                body: offer_sdp.to_string(),
            },
        )
        .await?;

        if answer.trim().is_empty() {
            bail!("realtime service returned an empty answer");
        }
        Ok(answer)
    }
}

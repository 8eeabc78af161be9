//! ureq 阻塞客户端的异步包装。

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum HttpFailure {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl HttpFailure {
    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            HttpFailure::Status { status, .. } => Some(*status),
            HttpFailure::Transport { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PostRequest {
    pub url: String,
    pub content_type: &'static str,
    pub authorization: Option<String>,
    pub body: String,
}

pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// 在阻塞线程池中执行 POST，返回响应正文。
pub(crate) async fn post(agent: &ureq::Agent, request: PostRequest) -> Result<String, HttpFailure> {
    let agent = agent.clone();
    tokio::task::spawn_blocking(move || post_blocking(&agent, &request))
        .await
        .map_err(|err| HttpFailure::Transport {
            message: format!("http worker terminated: {err}"),
        })?
}

fn post_blocking(agent: &ureq::Agent, request: &PostRequest) -> Result<String, HttpFailure> {
    debug!(target: "http", url = %request.url, "sending POST request");

    let mut call = agent
        .post(&request.url)
        .set("Content-Type", request.content_type);
    if let Some(authorization) = request.authorization.as_deref() {
        call = call.set("Authorization", authorization);
    }

    match call.send_string(&request.body) {
        Ok(response) => response
            .into_string()
            .map_err(|err| HttpFailure::Transport {
                message: format!("failed to read response body: {err}"),
            }),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(HttpFailure::Status {
                status,
                body: truncate(body.trim()),
            })
        }
        Err(ureq::Error::Transport(transport)) => Err(HttpFailure::Transport {
            message: transport.to_string(),
        }),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

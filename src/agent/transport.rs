use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;

use super::stream::ChunkStream;
use crate::config::SheetOpsConfig;
use crate::errors::{AgentError, RemoteError};
use crate::sync::extract::body_preview;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub message: String,
    /// Present when continuing an existing conversation.
    pub run_id: Option<String>,
    pub user_id: String,
}

pub struct AgentResponse {
    /// Conversation id to reuse on the next turn, when the agent sent one.
    pub run_id: Option<String>,
    pub body: ChunkStream,
}

/// Chat transport to the hosted agent.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

#[derive(Serialize)]
struct Payload<'a> {
    message: &'a str,
    user_id: &'a str,
}

/// Streams replies over HTTP: `POST {url}` starts a run, `PUT {url}/{run}`
/// continues it.
pub struct HttpAgentTransport {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    run_id_header: String,
}

impl HttpAgentTransport {
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        api_key: Option<String>,
        run_id_header: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            api_key,
            run_id_header: run_id_header.into(),
        }
    }

    pub fn from_config(config: &SheetOpsConfig) -> Result<Self, AgentError> {
        let url = config
            .agent_url
            .clone()
            .ok_or(RemoteError::NotConfigured("Agent URL"))?;
        Ok(Self::new(
            config.http_client(),
            url,
            config.agent_api_key.clone(),
            config.run_id_header.clone(),
        ))
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let builder = match request.run_id.as_deref() {
            Some(run_id) => self.http.put(format!("{}/{run_id}", self.url)),
            None => self.http.post(&self.url),
        };
        let mut builder = builder
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&Payload {
                message: &request.message,
                user_id: &request.user_id,
            });
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(RemoteError::from)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %body_preview(&text),
                "agent request failed"
            );
            return Err(RemoteError::Http {
                status: status.as_u16(),
                detail: body_preview(&text),
            }
            .into());
        }

        let run_id = response
            .headers()
            .get(self.run_id_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(RemoteError::from))
            .boxed();
        Ok(AgentResponse { run_id, body })
    }
}

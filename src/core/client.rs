//! Upstream model client
//!
//! [`ChatModel`] is the seam the gateway calls through. [`GeminiClient`]
//! streams `streamGenerateContent` as server-sent events and turns each event
//! into a [`StreamChunk`].

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::aggregator::StreamChunk;
use crate::core::config::GatewayConfig;
use crate::core::credentials::ApiCredential;
use crate::core::errors::{GatewayError, Result};

/// Stream of chunks from one model call
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// A single-prompt chat call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
        }
    }
}

/// Upstream chat model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streaming call. Errors before the first byte are returned
    /// directly; errors after that arrive inside the stream.
    async fn stream_chat(&self, request: ChatRequest, credential: &ApiCredential)
        -> Result<ChunkStream>;
}

/// Gemini REST client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Self::new(config.api_endpoint.clone(), config.upstream_timeout())
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.endpoint.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        credential: &ApiCredential,
    ) -> Result<ChunkStream> {
        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }]
            }]
        });

        debug!(model = %request.model, "Starting streaming request to Gemini");

        let response = self
            .client
            .post(self.stream_url(&request.model))
            .header("x-goog-api-key", credential.expose())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = status_code, "Gemini API error: {}", error_text);

            if status_code == 429 || GatewayError::is_quota_message(&error_text) {
                return Err(GatewayError::UpstreamQuotaExhausted);
            }

            return Err(GatewayError::Upstream {
                status: status_code,
                message: error_text,
            });
        }

        let bytes = Box::pin(response.bytes_stream());

        let chunks = stream::unfold(
            (bytes, Vec::<u8>::new(), false),
            |(mut bytes, mut buffer, mut finished)| async move {
                loop {
                    if let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=end).collect();
                        if let Some(chunk) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                            return Some((Ok(chunk), (bytes, buffer, finished)));
                        }
                        continue;
                    }

                    if finished {
                        let line = std::mem::take(&mut buffer);
                        return parse_sse_line(&String::from_utf8_lossy(&line))
                            .map(|chunk| (Ok(chunk), (bytes, buffer, finished)));
                    }

                    match bytes.next().await {
                        Some(Ok(data)) => buffer.extend_from_slice(&data),
                        Some(Err(e)) => {
                            return Some((Err(GatewayError::from(e)), (bytes, buffer, true)));
                        }
                        None => finished = true,
                    }
                }
            },
        );

        Ok(chunks.boxed())
    }
}

#[derive(Debug, Deserialize)]
struct GeminiEvent {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// Turn one SSE line into a chunk. Comments, blank lines and
/// unparseable payloads yield nothing.
pub(crate) fn parse_sse_line(line: &str) -> Option<StreamChunk> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    let event: GeminiEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            debug!("Skipping unparseable stream event: {}", e);
            return None;
        }
    };

    if let Some(error) = event.error {
        let message = match error.status {
            Some(status) => format!("{} ({})", error.message, status),
            None => error.message,
        };
        return Some(StreamChunk::Error(message));
    }

    let text: String = event
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Some(StreamChunk::Delta(text))
}

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CompletionError, CompletionErrorKind, CompletionSource, FragmentStream};
use crate::state::Message;

pub const DEFAULT_API_BASE: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (DeepSeek by default)
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionSource for ChatCompletionsClient {
    async fn stream_completion(&self, messages: &[Message]) -> Result<FragmentStream, CompletionError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| RequestMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, messages = messages.len(), "Opening completion stream");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            warn!(status, "Completion request rejected");
            return Err(CompletionError::from_status(status, &text));
        }

        let mut body = Box::pin(response.bytes_stream());
        let fragments = stream! {
            let mut decoder = SseDecoder::default();
            let mut finished = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(CompletionError::new(CompletionErrorKind::NetworkError, e.to_string()));
                        finished = true;
                        break;
                    }
                };

                for payload in decoder.push(&chunk) {
                    match parse_payload(&payload) {
                        Payload::Text(text) => yield Ok(text),
                        Payload::Skip => {}
                        Payload::Done => finished = true,
                        Payload::Failed(e) => {
                            yield Err(e);
                            finished = true;
                        }
                    }
                    if finished {
                        break;
                    }
                }
                if finished {
                    break;
                }
            }

            if !finished {
                // Body ended without [DONE]; flush a trailing event that had no newline
                if let Some(payload) = decoder.finish() {
                    match parse_payload(&payload) {
                        Payload::Text(text) => yield Ok(text),
                        Payload::Failed(e) => yield Err(e),
                        Payload::Skip | Payload::Done => {}
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }
}

#[derive(Debug, PartialEq)]
enum Payload {
    Text(String),
    Skip,
    Done,
    Failed(CompletionError),
}

fn parse_payload(data: &str) -> Payload {
    let data = data.trim();
    if data == "[DONE]" {
        return Payload::Done;
    }

    let chunk: ChunkResponse = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "Skipping unparseable stream payload");
            return Payload::Skip;
        }
    };

    if let Some(error) = chunk.error {
        let detail = format!("{} {}", error.message, error.kind.unwrap_or_default());
        return Payload::Failed(CompletionError::new(
            CompletionErrorKind::classify(None, &detail),
            error.message,
        ));
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Payload::Text(text),
        _ => Payload::Skip,
    }
}

/// Splits a server-sent-events body into `data:` payloads.
///
/// Network chunks can end mid-line (or mid-codepoint), so bytes are held
/// until a full line is available.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_field(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_field(&rest)
    }
}

fn data_field(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\n', '\r']);
    line.strip_prefix("data:").map(|data| data.trim_start().to_string())
}

//! Completion stream sources
//!
//! A source turns an ordered message list into a lazy stream of text
//! fragments. Each call issues a fresh remote request; streams are not
//! restartable.

pub mod openai;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::fmt;
use thiserror::Error;

use crate::state::Message;

pub use openai::ChatCompletionsClient;

/// Incremental model output. Ends when the model finishes its turn.
pub type FragmentStream = BoxStream<'static, Result<String, CompletionError>>;

#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Open a streaming completion over `messages` (first element is the system prompt)
    async fn stream_completion(&self, messages: &[Message]) -> Result<FragmentStream, CompletionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionErrorKind {
    Unauthorized,
    RateLimited,
    QuotaExceeded,
    NetworkError,
    Unknown,
}

impl CompletionErrorKind {
    /// Classify from an HTTP status (if any) and whatever text the API sent back
    pub fn classify(status: Option<u16>, detail: &str) -> Self {
        let detail = detail.to_lowercase();

        if status == Some(401) {
            return CompletionErrorKind::Unauthorized;
        }
        if status == Some(429) || detail.contains("rate limit") || detail.contains("rate_limit") {
            return CompletionErrorKind::RateLimited;
        }
        if status == Some(402)
            || detail.contains("quota")
            || detail.contains("insufficient balance")
            || detail.contains("insufficient_balance")
            || detail.contains("token limit")
            || detail.contains("maximum context length")
        {
            return CompletionErrorKind::QuotaExceeded;
        }
        if status.is_none()
            && (detail.contains("connect") || detail.contains("timed out") || detail.contains("dns"))
        {
            return CompletionErrorKind::NetworkError;
        }
        CompletionErrorKind::Unknown
    }

    /// Short explanation suitable for a user-facing notice
    pub fn hint(&self) -> &'static str {
        match self {
            CompletionErrorKind::Unauthorized => "API key was rejected, check the configured key",
            CompletionErrorKind::RateLimited => "rate limited, wait a moment and resend",
            CompletionErrorKind::QuotaExceeded => "quota or token limit reached",
            CompletionErrorKind::NetworkError => "could not reach the completion API",
            CompletionErrorKind::Unknown => "the completion request failed",
        }
    }
}

impl fmt::Display for CompletionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionErrorKind::Unauthorized => "unauthorized",
            CompletionErrorKind::RateLimited => "rate limited",
            CompletionErrorKind::QuotaExceeded => "quota exceeded",
            CompletionErrorKind::NetworkError => "network error",
            CompletionErrorKind::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub message: String,
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::new(
            CompletionErrorKind::classify(Some(status), body),
            format!("HTTP {}: {}", status, body.trim()),
        )
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if let Some(status) = e.status() {
            CompletionErrorKind::classify(Some(status.as_u16()), &e.to_string())
        } else if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            CompletionErrorKind::NetworkError
        } else {
            CompletionErrorKind::classify(None, &e.to_string())
        };
        Self::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(CompletionErrorKind::classify(Some(401), ""), CompletionErrorKind::Unauthorized);
        assert_eq!(CompletionErrorKind::classify(Some(429), ""), CompletionErrorKind::RateLimited);
        assert_eq!(CompletionErrorKind::classify(Some(402), ""), CompletionErrorKind::QuotaExceeded);
        assert_eq!(CompletionErrorKind::classify(Some(500), "boom"), CompletionErrorKind::Unknown);
    }

    #[test]
    fn test_unauthorized_wins_over_body_text() {
        let kind = CompletionErrorKind::classify(Some(401), "invalid token, rate limit info");
        assert_eq!(kind, CompletionErrorKind::Unauthorized);
    }

    #[test]
    fn test_classify_from_message_text() {
        assert_eq!(
            CompletionErrorKind::classify(Some(400), "Rate limit reached for requests"),
            CompletionErrorKind::RateLimited
        );
        assert_eq!(
            CompletionErrorKind::classify(None, "You exceeded your current quota"),
            CompletionErrorKind::QuotaExceeded
        );
        assert_eq!(
            CompletionErrorKind::classify(Some(400), "This model's maximum context length is 65536 tokens"),
            CompletionErrorKind::QuotaExceeded
        );
        assert_eq!(
            CompletionErrorKind::classify(None, "error trying to connect: connection refused"),
            CompletionErrorKind::NetworkError
        );
    }

    #[test]
    fn test_from_status_keeps_body() {
        let err = CompletionError::from_status(401, "{\"error\":\"bad key\"}\n");
        assert_eq!(err.kind, CompletionErrorKind::Unauthorized);
        assert!(err.message.contains("bad key"));
        assert!(err.to_string().starts_with("unauthorized"));
    }
}

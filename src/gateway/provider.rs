//! Provider abstraction: the trait every LLM back-end implements, plus the
//! failure taxonomy the fallback manager reasons about.
//!
//! Providers are deliberately thin: one completion call, one health probe.
//! Retry, fallback, rate limiting, caching, and logging all live above this
//! trait in the gateway, so a provider only has to translate a request onto
//! its wire format and classify what went wrong.

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified cause of a provider failure.
///
/// The classification drives both the fallback decision (authentication and
/// malformed requests never fall back) and the back-off base delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimit,
    Authentication,
    Connection,
    Timeout,
    ModelNotFound,
    InvalidRequest,
    Unknown,
}

impl FailureKind {
    /// Classify an HTTP status code from a provider API.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimit,
            401 | 403 => Self::Authentication,
            404 => Self::ModelNotFound,
            400 | 422 => Self::InvalidRequest,
            _ => Self::Unknown,
        }
    }

    /// Whether another provider may be tried after this failure.
    ///
    /// Authentication and malformed-request failures would fail identically
    /// everywhere and are escalated immediately. Unknown failures fall back
    /// conservatively.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Authentication | Self::InvalidRequest)
    }

    /// Base back-off delay before retrying after this failure kind.
    #[must_use]
    pub fn base_delay(self) -> Duration {
        match self {
            Self::RateLimit => Duration::from_secs(60),
            Self::Connection => Duration::from_secs(5),
            Self::Timeout => Duration::from_secs(3),
            _ => Duration::from_secs(1),
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::ModelNotFound => "model_not_found",
            Self::InvalidRequest => "invalid_request",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// A failed provider call, with its classified cause.
#[derive(Debug, Error, Diagnostic)]
#[error("provider {provider} failed ({kind}): {message}")]
#[diagnostic(code(fableforge::gateway::provider))]
pub struct ProviderError {
    pub provider: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(provider: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// Classify a `reqwest` transport error.
    #[must_use]
    pub fn from_transport(provider: impl Into<String>, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            FailureKind::Connection
        } else {
            FailureKind::Unknown
        };
        Self::new(provider, kind, err.to_string())
    }
}

/// One completion request on the provider wire.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A completed generation, with whatever usage data the provider reported.
#[derive(Clone, Debug, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// An LLM back-end capable of text completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider name used for routing, health tracking, and logs.
    fn name(&self) -> &str;

    /// Issue one completion call. Implementations classify their own
    /// failures into [`ProviderError`]; the gateway applies the timeout.
    async fn generate(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Lightweight availability probe.
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(FailureKind::from_status(429), FailureKind::RateLimit);
        assert_eq!(FailureKind::from_status(401), FailureKind::Authentication);
        assert_eq!(FailureKind::from_status(403), FailureKind::Authentication);
        assert_eq!(FailureKind::from_status(404), FailureKind::ModelNotFound);
        assert_eq!(FailureKind::from_status(400), FailureKind::InvalidRequest);
        assert_eq!(FailureKind::from_status(500), FailureKind::Unknown);
        assert_eq!(FailureKind::from_status(503), FailureKind::Unknown);
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(FailureKind::RateLimit.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::Connection.is_retryable());
        assert!(FailureKind::ModelNotFound.is_retryable());
        assert!(FailureKind::Unknown.is_retryable());
        assert!(!FailureKind::Authentication.is_retryable());
        assert!(!FailureKind::InvalidRequest.is_retryable());
    }

    #[test]
    fn base_delays() {
        assert_eq!(FailureKind::RateLimit.base_delay(), Duration::from_secs(60));
        assert_eq!(FailureKind::Connection.base_delay(), Duration::from_secs(5));
        assert_eq!(FailureKind::Timeout.base_delay(), Duration::from_secs(3));
        assert_eq!(FailureKind::Unknown.base_delay(), Duration::from_secs(1));
    }
}

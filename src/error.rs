// ADSMITH Error Taxonomy - Provider & Pipeline Error Kinds
// Copyright (c) 2026 AdSmith Collective | ADSMITH

use axum::http::StatusCode;
use thiserror::Error;

/// How a failed provider call should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Transient (5xx, network, timeout); retry with backoff.
    Retryable,
    /// Rate limit / quota exhaustion; back off longer, then fall over.
    Quota,
    /// 4xx the provider will never accept, do not retry.
    Permanent,
    /// The request itself was malformed (our fault, or unsupported params).
    InvalidInput,
}

/// Error surfaced by a provider adapter after its internal retries.
#[derive(Debug, Clone, Error)]
#[error("{provider}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Last HTTP status (or provider-specific code) observed upstream.
    pub upstream_code: Option<u16>,
}

impl ProviderError {
    pub fn new(provider: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            message: message.into(),
            upstream_code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.upstream_code = Some(code);
        self
    }

    pub fn retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Retryable | ErrorKind::Quota)
    }

    /// Classify an HTTP status into an error kind.
    pub fn kind_for_status(status: u16) -> ErrorKind {
        match status {
            429 => ErrorKind::Quota,
            400 | 413 | 415 | 422 => ErrorKind::InvalidInput,
            s if (500..600).contains(&s) => ErrorKind::Retryable,
            s if (400..500).contains(&s) => ErrorKind::Permanent,
            _ => ErrorKind::Retryable,
        }
    }
}

/// Top-level pipeline error. Stage drivers switch on these variants; the
/// server maps them onto HTTP statuses.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The project is not in the state the requested operation expects.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("project not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("assembly failed: {0}")]
    Assembly(String),

    /// A stage-fatal condition; flips the project to `failed`.
    #[error("stage '{stage}' failed: {detail}")]
    StageFailed { stage: String, detail: String },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::Conflict(_) => StatusCode::CONFLICT,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderError::kind_for_status(429), ErrorKind::Quota);
        assert_eq!(ProviderError::kind_for_status(503), ErrorKind::Retryable);
        assert_eq!(ProviderError::kind_for_status(400), ErrorKind::InvalidInput);
        assert_eq!(ProviderError::kind_for_status(404), ErrorKind::Permanent);
    }

    #[test]
    fn test_retryable_kinds() {
        let e = ProviderError::new("img", ErrorKind::Quota, "rate limited");
        assert!(e.retryable());
        let e = ProviderError::new("img", ErrorKind::Permanent, "bad model");
        assert!(!e.retryable());
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(
            PipelineError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PipelineError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}

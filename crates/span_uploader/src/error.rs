//! Error types for export, conversion and pipeline control.

use thiserror::Error;

/// Errors returned by an [`Exporter`](crate::exporter::Exporter).
///
/// The pipeline only distinguishes success from failure; the variants exist
/// for logging and for the request-level retry decision in the HTTP layer.
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    /// Transport-layer error (connect, TLS, body read)
    #[error("transport error: {0}")]
    Transport(String),
    /// Request body could not be encoded or response body decoded
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The backend answered, but not with success
    #[error("remote service error: {msg} [httpcode={http_status} code={code} logid={log_id}]")]
    RemoteService {
        http_status: u16,
        code: i64,
        msg: String,
        log_id: String,
    },
    /// Export operation timed out
    #[error("export operation timed out")]
    Timeout,
}

impl ExportError {
    /// Whether a request-level retry can help.
    ///
    /// Transport failures, timeouts and 5xx answers are retryable; anything
    /// the backend rejected on purpose is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::RemoteService { http_status, .. } => *http_status >= 500,
            Self::Serialization(_) => false,
        }
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Serialization(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Errors surfaced by `force_flush` / `shutdown`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// The caller's cancellation token fired first; drain state is unknown.
    #[error("operation cancelled before the queue was drained")]
    Cancelled,
    /// The queue worker task is gone.
    #[error("queue worker is no longer running")]
    WorkerStopped,
}

/// Errors converting a span into its upload form.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Multi-modal tag value is not valid model content JSON
    #[error("malformed multi-modal content in tag `{tag}`: {source}")]
    MalformedContent {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
    /// Re-serialising converted content failed
    #[error("failed to encode content of tag `{tag}`: {source}")]
    Encode {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ExportError::Transport("reset".into()).is_retryable());
        assert!(ExportError::Timeout.is_retryable());
        assert!(ExportError::RemoteService {
            http_status: 503,
            code: -1,
            msg: String::new(),
            log_id: String::new(),
        }
        .is_retryable());
        assert!(!ExportError::RemoteService {
            http_status: 200,
            code: 600_001,
            msg: "bad workspace".into(),
            log_id: "abc".into(),
        }
        .is_retryable());
        assert!(!ExportError::Serialization("eof".into()).is_retryable());
    }
}

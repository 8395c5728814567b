//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility: these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the model endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The endpoint answered 2xx but the body was not what we expected.
    #[error("invalid response from model endpoint: {reason}")]
    InvalidResponse { reason: String },
}

impl InferenceError {
    /// Ollama answers 404 when the requested model has not been pulled.
    pub fn is_model_missing(&self) -> bool {
        matches!(self, InferenceError::HttpError { status: 404, .. })
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_model_missing() {
        let err = InferenceError::HttpError {
            status: 404,
            body: r#"{"error":"model 'llama9' not found"}"#.to_string(),
        };
        assert!(err.is_model_missing());

        let err = InferenceError::HttpError {
            status: 500,
            body: "internal server error".to_string(),
        };
        assert!(!err.is_model_missing());
    }

    #[test]
    fn test_error_body_http_error() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(err.error_body().is_none());
    }

    #[test]
    fn test_display() {
        let err = InferenceError::ConnectionFailed {
            endpoint: "http://localhost:11434/api/generate".into(),
            reason: "refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "connection failed to http://localhost:11434/api/generate: refused"
        );
    }
}

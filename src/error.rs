use std::time::Duration;

use crate::ResponseBody;

/// Boxed error returned by interceptors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-success HTTP status with the decoded error body, if any.
    #[error("{message}")]
    Http {
        /// Human-readable message, taken from the body when it carries one.
        message: String,
        status: u16,
        status_text: String,
        /// Error body decoded as JSON, falling back to text.
        body: Option<ResponseBody>,
    },
    /// The request never produced an HTTP status.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// A request interceptor rejected the call before any attempt was made.
    #[error("request interceptor error: {0}")]
    RequestInterceptor(#[source] BoxError),
    /// A response interceptor failed during an attempt.
    #[error("response interceptor error: {0}")]
    ResponseInterceptor(#[source] BoxError),
    /// A successful response whose body did not match its content type.
    #[error("decode error: {0}")]
    Decode(String),
    /// A request body could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
    /// Invalid input detected before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Reading a local file for upload failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that happen below the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The attempt did not complete within its timeout.
    #[error("request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    /// Network or request execution error from `reqwest`.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    /// Connection failure reported by a non-reqwest transport.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl ApiError {
    /// Builds an HTTP failure; the message comes from a JSON `message` field
    /// in `body` when present.
    pub fn http(status: u16, status_text: impl Into<String>, body: Option<ResponseBody>) -> Self {
        let status_text = status_text.into();
        let message = body
            .as_ref()
            .and_then(ResponseBody::message)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("HTTP {status}: {status_text}"));
        Self::Http {
            message,
            status,
            status_text,
            body,
        }
    }

    /// HTTP status of the failure, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for HTTP 400-499.
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|status| (400..500).contains(&status))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Timeout(_)))
    }

    /// Whether another attempt may be made after this failure.
    ///
    /// Client errors are terminal. Every other HTTP status, every transport
    /// failure and response interceptor failures are retry-eligible. Request
    /// interceptors run once per call, so their failures are terminal, as are
    /// decode, encode, configuration and local I/O errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } => !self.is_client_error(),
            Self::Transport(_) | Self::ResponseInterceptor(_) => true,
            Self::RequestInterceptor(_)
            | Self::Decode(_)
            | Self::Encode(_)
            | Self::Config(_)
            | Self::Io(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::{ApiError, ResponseBody, TransportError};

    #[test]
    fn client_errors_are_terminal() {
        for status in [400, 401, 404, 422, 499] {
            let err = ApiError::http(status, "x", None);
            assert!(err.is_client_error());
            assert!(!err.is_retryable(), "status {status} must not retry");
        }
    }

    #[test]
    fn server_and_other_statuses_retry() {
        for status in [302, 500, 502, 503, 504] {
            assert!(ApiError::http(status, "x", None).is_retryable());
        }
    }

    #[test]
    fn transport_failures_retry() {
        let err = ApiError::from(TransportError::Timeout(Duration::from_millis(5)));
        assert!(err.is_retryable());
        assert!(err.is_timeout());
        assert_eq!(err.status(), None);
        assert!(ApiError::from(TransportError::Connection("refused".to_owned())).is_retryable());
    }

    #[test]
    fn interceptor_failures_retry_only_on_the_response_side() {
        assert!(ApiError::ResponseInterceptor("flaky".into()).is_retryable());
        assert!(!ApiError::RequestInterceptor("no token".into()).is_retryable());
    }

    #[test]
    fn decode_and_config_do_not_retry() {
        assert!(!ApiError::Decode("bad".to_owned()).is_retryable());
        assert!(!ApiError::Config("bad".to_owned()).is_retryable());
    }

    #[test]
    fn http_message_prefers_body_message() {
        let err = ApiError::http(
            422,
            "Unprocessable Entity",
            Some(ResponseBody::Json(json!({"message": "email is taken"}))),
        );
        assert_eq!(err.to_string(), "email is taken");

        let err = ApiError::http(503, "Service Unavailable", Some(ResponseBody::text("down")));
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
    }
}

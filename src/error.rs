//! Error types for the agent core.
//!
//! The taxonomy here is shaped around what the host can do about a failure
//! rather than around the Rust type that produced it: every variant answers
//! "is this retryable, and with what delay" (see [`Error::is_retryable`]).

use thiserror::Error;

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport failure (connection reset, DNS, TLS, etc).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (bad base URL, missing model id, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No provider is registered for the requested API identifier.
    #[error("no provider registered for api: {0}")]
    NoProvider(String),

    /// Non-2xx HTTP response the status-to-kind table doesn't special-case.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Malformed provider payload (bad SSE frame, undecodable JSON body).
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// 429 Too Many Requests. Carries `Retry-After` in seconds when the
    /// provider supplied one.
    #[error("rate limited{}", retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    /// 529 (provider-specific "overloaded").
    #[error("provider overloaded")]
    Overloaded,

    /// 5xx server error.
    #[error("server error ({status})")]
    ServerError { status: u16 },

    /// The stream was cancelled by the caller.
    #[error("aborted")]
    Aborted,

    /// Tool execution or lookup failure.
    #[error("tool error: {0}")]
    Tool(String),

    /// Caller-supplied input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Session store failure.
    #[error("session error: {0}")]
    Session(#[from] crate::session::SessionError),

    /// Catch-all for conditions that don't merit a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn decoding(msg: impl Into<String>) -> Self {
        Error::Decoding(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Classify an HTTP status code per the provider error-mapping table:
    /// 429 -> RateLimited, 529 -> Overloaded, >=500 -> ServerError, else
    /// an Api error carrying whatever message the provider body yielded.
    pub fn from_status(status: u16, retry_after: Option<u64>, body_message: Option<String>) -> Self {
        match status {
            429 => Error::RateLimited { retry_after },
            529 => Error::Overloaded,
            s if s >= 500 => Error::ServerError { status: s },
            s => Error::Api {
                status: s,
                message: body_message.unwrap_or_else(|| "unknown error".to_string()),
            },
        }
    }

    /// Whether the host may reasonably retry the operation that produced
    /// this error: network errors, timeouts, rate limits, overload, and 5xx
    /// are retryable; aborts, decoding failures, missing providers, and bad
    /// input are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Timeout
                | Error::RateLimited { .. }
                | Error::Overloaded
                | Error::ServerError { .. }
        )
    }

    /// Seconds the host should wait before retrying, if the error specifies one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            Error::from_status(429, Some(5), None),
            Error::RateLimited { retry_after: Some(5) }
        ));
        assert!(matches!(Error::from_status(529, None, None), Error::Overloaded));
        assert!(matches!(
            Error::from_status(503, None, None),
            Error::ServerError { status: 503 }
        ));
        let api = Error::from_status(404, None, Some("not found".into()));
        match api {
            Error::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "not found");
            }
            _ => panic!("expected Api variant"),
        }
    }

    #[test]
    fn retryability() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Overloaded.is_retryable());
        assert!(Error::ServerError { status: 500 }.is_retryable());
        assert!(Error::RateLimited { retry_after: None }.is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::Decoding("bad".into()).is_retryable());
        assert!(!Error::NoProvider("foo".into()).is_retryable());
    }

    #[test]
    fn retry_after_extraction() {
        assert_eq!(
            Error::RateLimited { retry_after: Some(30) }.retry_after_secs(),
            Some(30)
        );
        assert_eq!(Error::Overloaded.retry_after_secs(), None);
    }
}

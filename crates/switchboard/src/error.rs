//! Engine error types.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status the platform uses when a session's service moved to another node.
pub const STATUS_SESSION_MIGRATED: u16 = 435;

/// HTTP status returned while a fresh login has not reached every backend node.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Errors that can occur while authenticating, streaming or reading caches.
#[derive(Debug, Error)]
pub enum Error {
    /// Login never propagated to the API host within the retry budget.
    #[error("authentication not accepted after {attempts} attempts: {source}")]
    TransientAuth { attempts: u32, source: ApiError },

    /// The service was migrated; the cached session has been dropped.
    #[error("session migrated, login required: {0}")]
    SessionMigrated(ApiError),

    /// Any other non-2xx REST answer.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Inbound push frame could not be decoded or applied.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// No pong arrived within the heartbeat window.
    #[error("no pong received for {elapsed:?}, limit is {limit:?}")]
    HeartbeatTimeout { elapsed: Duration, limit: Duration },

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The session user does not appear in the domain user listing.
    #[error("unknown user id: {0}")]
    UnknownUserId(String),

    /// HTTP request failed before a status was received.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Transport-level failure reported by a non-reqwest transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A push connection task panicked or was aborted unexpectedly.
    #[error("push task failed: {0}")]
    TaskFailed(String),

    #[error("push connection closed by server")]
    ConnectionClosed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// HTTP status carried by REST-derived errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::TransientAuth { source, .. } => Some(source.status),
            Error::SessionMigrated(err) | Error::Api(err) => Some(err.status),
            _ => None,
        }
    }

    /// True for errors that only end the current push connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Frame(_)
                | Error::HeartbeatTimeout { .. }
                | Error::WebSocket(_)
                | Error::ConnectionClosed
                | Error::TaskFailed(_)
        )
    }
}

/// Uniform REST error: status, raw body and the vendor message if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub body: Vec<u8>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExceptionEnvelope {
    #[serde(rename = "five9ExceptionDetail")]
    detail: ExceptionDetail,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetail {
    #[serde(default)]
    message: String,
}

impl ApiError {
    /// Build from a failed response. Bodies that are not the exception
    /// envelope still produce an error, just without a message.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<ExceptionEnvelope>(body)
            .ok()
            .map(|envelope| envelope.detail.message)
            .filter(|message| !message.is_empty());

        Self {
            status,
            body: body.to_vec(),
            message,
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "REST API error (status {}): {}", self.status, message),
            None => write!(f, "REST API error, status code: {}", self.status),
        }
    }
}

impl std::error::Error for ApiError {}

/// A push frame that could not be processed. Carries the raw bytes for diagnostics.
#[derive(Debug, Clone, Error)]
#[error("error while processing push frame: {reason} - {}", String::from_utf8_lossy(.raw))]
pub struct FrameError {
    pub reason: String,
    pub raw: Vec<u8>,
}

impl FrameError {
    pub fn new(reason: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_vec(),
        }
    }
}

/// Typed cache read failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache was never populated since the last reset.
    #[error("cache is not ready")]
    NotReady,

    /// The cache was populated but is older than its maximum age.
    #[error("cache is stale: age {age:?} exceeds {max_age:?}")]
    Stale { age: Duration, max_age: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_extracts_vendor_message() {
        let body = br#"{"five9ExceptionDetail":{"timestamp":1,"errorCode":7,"message":"Session expired","context":{}}}"#;
        let err = ApiError::from_response(401, body);

        assert_eq!(err.status, 401);
        assert_eq!(err.message.as_deref(), Some("Session expired"));
        assert_eq!(err.to_string(), "REST API error (status 401): Session expired");
        assert_eq!(err.body, body.to_vec());
    }

    #[test]
    fn test_api_error_tolerates_non_json_body() {
        let err = ApiError::from_response(502, b"<html>bad gateway</html>");

        assert_eq!(err.message, None);
        assert_eq!(err.to_string(), "REST API error, status code: 502");
        assert_eq!(err.body_text(), "<html>bad gateway</html>");
    }

    #[test]
    fn test_frame_error_display_includes_raw_frame() {
        let err = FrameError::new("missing event id", br#"{"payload":1}"#);
        assert_eq!(
            err.to_string(),
            r#"error while processing push frame: missing event id - {"payload":1}"#
        );
    }

    #[test]
    fn test_status_and_fatality() {
        let migrated = Error::SessionMigrated(ApiError::from_response(435, b""));
        assert_eq!(migrated.status(), Some(435));
        assert!(!migrated.is_connection_fatal());

        let timeout = Error::HeartbeatTimeout {
            elapsed: Duration::from_secs(46),
            limit: Duration::from_secs(45),
        };
        assert_eq!(timeout.status(), None);
        assert!(timeout.is_connection_fatal());
        assert!(Error::TaskFailed("panicked".to_string()).is_connection_fatal());
    }
}

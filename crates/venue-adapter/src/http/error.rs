/*
[INPUT]:  Error sources (HTTP transport, venue responses, serialization, auth)
[OUTPUT]: Categorized error types with retry hints
[POS]:    Error handling layer - unified error type for the adapter
[UPDATE]: When adding new error sources or changing categorization
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the venue adapter.
///
/// The quoting engine relies on the category, not the payload: `NotFound`
/// drives the reconciliation 404 rules, `Timeout`/`Network` are transient,
/// `Rejected` is a definitive venue decision.
#[derive(Error, Debug)]
pub enum VenueError {
    /// The venue does not know the referenced resource (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Request deadline exceeded.
    #[error("request timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Definitive venue rejection (precision, margin, invalid params).
    #[error("venue rejected request (code {code}): {message}")]
    Rejected { code: i32, message: String },

    /// Transport failure or venue-side 5xx.
    #[error("network error: {0}")]
    Network(String),

    /// Authentication failed.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Session token is missing or expired.
    #[error("session expired, re-run the session handshake")]
    SessionExpired,

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The venue returned a body the adapter could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl VenueError {
    /// Transient errors are retried on the next control-loop cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VenueError::Timeout { .. }
                | VenueError::Network(_)
                | VenueError::WebSocket(_)
                | VenueError::InvalidResponse(_)
        )
    }

    /// Errors that require re-establishing the session before retrying.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            VenueError::Authentication { .. } | VenueError::SessionExpired
        )
    }

    /// Categorize a transport-level failure from `reqwest`.
    pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            VenueError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            VenueError::Network(err.to_string())
        }
    }

    /// Categorize a non-success HTTP status with its body text.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::NOT_FOUND => VenueError::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VenueError::Authentication {
                message: body.to_string(),
            },
            status if status.is_server_error() => {
                VenueError::Network(format!("http {status}: {body}"))
            }
            status => VenueError::Rejected {
                code: status.as_u16() as i32,
                message: body.to_string(),
            },
        }
    }
}

/// Result type alias for venue operations.
pub type Result<T> = std::result::Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable_but_rejection_is_not() {
        assert!(VenueError::Timeout { duration_secs: 5 }.is_retryable());
        assert!(
            !VenueError::Rejected {
                code: 400,
                message: "bad qty".to_string()
            }
            .is_retryable()
        );
        assert!(!VenueError::NotFound.is_retryable());
    }

    #[test]
    fn status_mapping_covers_the_categories() {
        assert!(matches!(
            VenueError::from_status(StatusCode::NOT_FOUND, ""),
            VenueError::NotFound
        ));
        assert!(matches!(
            VenueError::from_status(StatusCode::UNAUTHORIZED, "expired"),
            VenueError::Authentication { .. }
        ));
        assert!(matches!(
            VenueError::from_status(StatusCode::BAD_GATEWAY, ""),
            VenueError::Network(_)
        ));
        assert!(matches!(
            VenueError::from_status(StatusCode::BAD_REQUEST, "precision"),
            VenueError::Rejected { code: 400, .. }
        ));
    }

    #[test]
    fn auth_errors_are_flagged() {
        assert!(VenueError::SessionExpired.is_auth_error());
        assert!(!VenueError::NotFound.is_auth_error());
    }
}

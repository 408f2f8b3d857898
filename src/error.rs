// Error handling module
// Defines the session error taxonomy shared by every auth operation

use thiserror::Error;

/// Errors surfaced by the session manager and the authorized HTTP client.
///
/// The enum is `Clone` because a single refresh outcome is delivered to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Login or registration rejected by the server
    #[error("{0}")]
    InvalidCredentials(String),

    /// Refresh failed; the local session has been terminated
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Access token could not be decoded
    #[error("Token decode error: {0}")]
    TokenDecode(String),

    /// Cached profile could not be parsed
    #[error("Stored user data is corrupt: {0}")]
    StorageCorruption(String),

    /// Persisted storage failed to read or write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Request still rejected after its single retry
    #[error("Unauthorized - request rejected after token refresh")]
    Unauthorized,

    /// Registration payload could not be shaped
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-success status passed back from an authorized request
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Successful status with an unusable body
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Login or registration already running
    #[error("Another login or registration is already in progress")]
    AuthenticationInProgress,
}

impl SessionError {
    /// Errors after which the caller must send the user back to login
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, SessionError::SessionExpired(_) | SessionError::Unauthorized)
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_decode() {
            "decode_error"
        } else if err.is_body() {
            "body_error"
        } else {
            "request_error"
        };
        SessionError::Network(format!("{} (kind: {})", err, kind))
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", err))
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

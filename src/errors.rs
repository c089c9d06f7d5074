//! Error types shared across the session manager.

use http::StatusCode;

/// Failure reading or writing durable storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage contents are not valid JSON: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Lock,
}

/// Failure decoding the claims embedded in a signed token.
#[derive(Debug, thiserror::Error)]
pub enum TokenDecodeError {
    #[error("token is malformed: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),
    #[error("token expiry {0} is out of range")]
    ExpiryOutOfRange(i64),
}

/// Errors surfaced to callers of the session manager and the request middleware.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Login rejected by the server.
    #[error("invalid credentials: {0}")]
    Credentials(String),
    /// The call failed with an authorization error that could not be recovered by a refresh.
    #[error("unauthorized")]
    Unauthorized,
    #[error("request failed ({status}): {body}")]
    Status { status: StatusCode, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Whether this error is the server rejecting the presented credential.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SessionError::Unauthorized => true,
            SessionError::Status { status, .. } => *status == StatusCode::UNAUTHORIZED,
            SessionError::Transport(e) => e.status() == Some(reqwest::StatusCode::UNAUTHORIZED),
            _ => false,
        }
    }
}

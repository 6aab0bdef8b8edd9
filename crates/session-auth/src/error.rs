//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Network failure or server-side error; the session is still intact
    #[error("Network unavailable: {0}")]
    TransientNetwork(String),

    /// The backend revoked or refused the refresh token
    #[error("Session rejected: {0}")]
    AuthRejected(String),

    /// The request was still unauthorized after the session was repaired
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Invalid email, password or OAuth token
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// No session stored
    #[error("Not logged in")]
    NotLoggedIn,

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] credential_storage::StorageError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::TransientNetwork(_) => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Returns true if the user has to sign in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::AuthRejected(_) | AuthError::AuthenticationRequired | AuthError::NotLoggedIn
        )
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

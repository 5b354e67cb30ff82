mod manager;
mod policy;
mod refresh_worker;

pub use manager::{SessionManager, SessionOptions};

use crate::state::StoreError;
use crate::types::{FieldError, SessionState};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out")]
    Timeout,
    #[error("rejected with status {0}")]
    Rejected(u16),
    #[error("refresh token is no longer valid")]
    InvalidRefreshToken,
    #[error("malformed response")]
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No session. Log in to continue.")]
    NoSession,
    #[error("Access token is malformed.")]
    TokenMalformed,
    #[error("Session refresh failed: {0}.")]
    RefreshFailed(RefreshFailure),
    #[error("Remote logout failed: {0}")]
    LogoutFailed(String),
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("Account is not verified. Check your email.")]
    AccountUnverified,
    #[error("Validation failed.")]
    Validation(Vec<FieldError>),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Token storage failed: {0}")]
    Storage(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

pub(crate) fn transition(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        tracing::debug!(from = ?*current, to = ?next, "session state changed");
        *current = next;
        true
    });
}

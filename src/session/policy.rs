use super::{RefreshFailure, SessionError};
use crate::api::{ApiError, ZoppliHttpErrorStatus};
use crate::types::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClearScope {
    AccessOnly,
    Both,
}

pub(crate) fn classify_refresh_error(err: &ApiError) -> RefreshFailure {
    match err {
        ApiError::Network(msg) => RefreshFailure::Network(msg.clone()),
        ApiError::Timeout => RefreshFailure::Timeout,
        ApiError::Malformed(_) => RefreshFailure::Malformed,
        ApiError::Validation(_) => RefreshFailure::Rejected(400),
        ApiError::Status { status, .. } => match err.http_status() {
            Some(ZoppliHttpErrorStatus::Unauthorized | ZoppliHttpErrorStatus::Forbidden) => {
                RefreshFailure::InvalidRefreshToken
            }
            _ => RefreshFailure::Rejected(*status),
        },
    }
}

/// The refresh token survives a failed exchange unless the server disowned it.
pub(crate) fn clear_scope(failure: &RefreshFailure) -> ClearScope {
    match failure {
        RefreshFailure::InvalidRefreshToken => ClearScope::Both,
        _ => ClearScope::AccessOnly,
    }
}

pub(crate) fn classify_login_error(err: ApiError) -> SessionError {
    let message = err
        .server_message()
        .map(str::to_string)
        .unwrap_or_else(|| "An error occurred on the server. Please try again later.".to_string());
    let http_status = err.http_status();
    match err {
        ApiError::Network(msg) => SessionError::Network(msg),
        ApiError::Timeout => SessionError::Network("request timed out".to_string()),
        ApiError::Validation(errors) => SessionError::Validation(errors),
        ApiError::Malformed(msg) => SessionError::Server(msg),
        ApiError::Status { .. } => match http_status {
            Some(ZoppliHttpErrorStatus::BadRequest | ZoppliHttpErrorStatus::Unauthorized) => {
                SessionError::InvalidCredentials
            }
            Some(ZoppliHttpErrorStatus::Forbidden) => SessionError::AccountUnverified,
            _ => SessionError::Server(message),
        },
    }
}

pub(crate) fn classify_register_error(err: ApiError) -> SessionError {
    match err {
        ApiError::Status {
            status: 400,
            message,
        } => SessionError::Validation(vec![FieldError {
            path: String::new(),
            message: message.unwrap_or_else(|| "Registration details were rejected.".to_string()),
        }]),
        other => match classify_login_error(other) {
            SessionError::InvalidCredentials | SessionError::AccountUnverified => {
                SessionError::Server("Registration was rejected.".to_string())
            }
            mapped => mapped,
        },
    }
}

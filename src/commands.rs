use crate::api::{ApiError, ZoppliHttpErrorStatus};
use crate::redact::redact_secrets;
use crate::session::{SessionError, SessionManager};
use crate::state::AppState;
use crate::token;
use crate::types::{
    IpcErrorCode, IpcResult, LoginPayload, RegisterPayload, RestaurantDetail, RestaurantSummary,
    SessionInfo, SessionState, User,
};

const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

fn session_error_code(err: &SessionError) -> IpcErrorCode {
    match err {
        SessionError::NoSession => IpcErrorCode::NoSession,
        SessionError::TokenMalformed | SessionError::RefreshFailed(_) => {
            IpcErrorCode::SessionExpired
        }
        SessionError::InvalidCredentials => IpcErrorCode::InvalidCredentials,
        SessionError::AccountUnverified => IpcErrorCode::Unverified,
        SessionError::Validation(_) => IpcErrorCode::Validation,
        SessionError::Server(_) => IpcErrorCode::Server,
        SessionError::Network(_) | SessionError::LogoutFailed(_) => IpcErrorCode::Network,
        SessionError::Storage(_) => IpcErrorCode::Storage,
        SessionError::Internal(_) => IpcErrorCode::Unknown,
    }
}

fn session_err<T>(err: SessionError) -> IpcResult<T> {
    let code = session_error_code(&err);
    let message = match err {
        SessionError::RefreshFailed(_) | SessionError::TokenMalformed => {
            SESSION_EXPIRED_MESSAGE.to_string()
        }
        SessionError::Validation(errors) => errors
            .iter()
            .map(|e| {
                if e.path.is_empty() {
                    e.message.clone()
                } else {
                    format!("{}: {}", e.path, e.message)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => redact_secrets(&other.to_string()).to_string(),
    };
    IpcResult::err(code, message)
}

fn api_err<T>(err: ApiError) -> IpcResult<T> {
    let code = match &err {
        ApiError::Network(_) | ApiError::Timeout => IpcErrorCode::Network,
        ApiError::Validation(_) => IpcErrorCode::Validation,
        ApiError::Malformed(_) => IpcErrorCode::Server,
        ApiError::Status { .. } => match err.http_status() {
            Some(ZoppliHttpErrorStatus::Unauthorized | ZoppliHttpErrorStatus::Forbidden) => {
                IpcErrorCode::SessionExpired
            }
            Some(ZoppliHttpErrorStatus::BadRequest | ZoppliHttpErrorStatus::NotFound) => {
                IpcErrorCode::Validation
            }
            _ => IpcErrorCode::Server,
        },
    };
    let message = err
        .server_message()
        .map(str::to_string)
        .unwrap_or_else(|| match code {
            IpcErrorCode::Network => {
                "Network error. Please check your connection and try again.".to_string()
            }
            IpcErrorCode::SessionExpired => SESSION_EXPIRED_MESSAGE.to_string(),
            _ => "An error occurred on the server. Please try again later.".to_string(),
        });
    IpcResult::err(code, redact_secrets(&message).to_string())
}

fn validation_err<T>(message: &str) -> IpcResult<T> {
    IpcResult::err(IpcErrorCode::Validation, message)
}

fn authenticated(access_token: &str) -> SessionInfo {
    SessionInfo {
        state: SessionState::Authenticated,
        expires_at: SessionManager::inspect(access_token)
            .ok()
            .and_then(|c| c.expires_at())
            .and_then(token::rfc3339),
    }
}

pub async fn session_resume(state: &AppState) -> IpcResult<SessionInfo> {
    IpcResult::ok(state.session.resume().await)
}

pub async fn session_token(state: &AppState) -> IpcResult<String> {
    match state.session.get_valid_access_token().await {
        Ok(access_token) => IpcResult::ok(access_token),
        Err(e) => session_err(e),
    }
}

pub async fn session_refresh(state: &AppState) -> IpcResult<SessionInfo> {
    match state.session.refresh().await {
        Ok(access_token) => IpcResult::ok(authenticated(&access_token)),
        Err(e) => session_err(e),
    }
}

pub async fn auth_login(state: &AppState, payload: LoginPayload) -> IpcResult<SessionInfo> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return validation_err("Please enter your email and password.");
    }
    match state.session.login(&payload.email, &payload.password).await {
        Ok(pair) => IpcResult::ok(authenticated(&pair.access_token)),
        Err(e) => session_err(e),
    }
}

pub async fn auth_register(state: &AppState, payload: RegisterPayload) -> IpcResult<String> {
    let checks = [
        (payload.name.as_str(), "Please enter your name."),
        (payload.email.as_str(), "Please enter your email."),
        (payload.password.as_str(), "Please choose a password."),
    ];
    if let Some((_, message)) = checks.iter().find(|(value, _)| value.trim().is_empty()) {
        return validation_err(message);
    }
    match state.session.register(&payload).await {
        Ok(message) => IpcResult::ok(message),
        Err(e) => session_err(e),
    }
}

pub async fn auth_logout(state: &AppState) -> IpcResult<()> {
    match state.session.logout().await {
        Ok(()) => IpcResult::ok(()),
        Err(e) => session_err(e),
    }
}

pub async fn user_me(state: &AppState) -> IpcResult<User> {
    let access_token = match state.session.get_valid_access_token().await {
        Ok(t) => t,
        Err(e) => return session_err(e),
    };
    match state.api.fetch_me(&access_token).await {
        Ok(user) => IpcResult::ok(user),
        Err(e) => api_err(e),
    }
}

/// Browsing works signed out; a valid token is attached when there is one.
pub async fn restaurants_list(
    state: &AppState,
    page: Option<u32>,
) -> IpcResult<Vec<RestaurantSummary>> {
    let access_token = match state.session.get_valid_access_token().await {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::debug!(error = %e, "listing restaurants without a session");
            None
        }
    };
    let limit = state.settings.restaurants_page_size();
    match state
        .api
        .list_restaurants(page.unwrap_or(1), limit, access_token.as_deref())
        .await
    {
        Ok(page) => IpcResult::ok(page),
        Err(e) => api_err(e),
    }
}

pub async fn restaurant_get(state: &AppState, restaurant_id: &str) -> IpcResult<RestaurantDetail> {
    if restaurant_id.trim().is_empty() {
        return validation_err("Restaurant id is required.");
    }
    match state.api.get_restaurant(restaurant_id).await {
        Ok(detail) => IpcResult::ok(detail),
        Err(e) => api_err(e),
    }
}

pub async fn password_reset_request(state: &AppState, email: &str) -> IpcResult<()> {
    if email.trim().is_empty() {
        return validation_err("Please enter your email");
    }
    match state.api.request_password_reset(email).await {
        Ok(()) => IpcResult::ok(()),
        Err(e) => api_err(e),
    }
}

pub async fn password_reset(
    state: &AppState,
    otp: &str,
    new_password: &str,
    confirm_password: &str,
) -> IpcResult<()> {
    if otp.trim().is_empty() || new_password.is_empty() || confirm_password.is_empty() {
        return validation_err("Please fill in all fields");
    }
    if new_password != confirm_password {
        return validation_err("Passwords do not match");
    }
    match state.api.reset_password(otp, new_password).await {
        Ok(()) => IpcResult::ok(()),
        Err(e) => api_err(e),
    }
}

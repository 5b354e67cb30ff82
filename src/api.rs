use crate::redact::redact_secrets;
use crate::types::{
    CredentialPair, FieldError, LoginPayload, RegisterPayload, RestaurantDetail,
    RestaurantSummary, User,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://10.0.2.2:5000/api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoppliHttpErrorStatus {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Server,
    Other,
}

pub fn map_http_status(status_code: u16) -> ZoppliHttpErrorStatus {
    match status_code {
        400 => ZoppliHttpErrorStatus::BadRequest,
        401 => ZoppliHttpErrorStatus::Unauthorized,
        403 => ZoppliHttpErrorStatus::Forbidden,
        404 => ZoppliHttpErrorStatus::NotFound,
        500..=599 => ZoppliHttpErrorStatus::Server,
        _ => ZoppliHttpErrorStatus::Other,
    }
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server responded with status {status}")]
    Status { status: u16, message: Option<String> },
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("invalid response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn http_status(&self) -> Option<ZoppliHttpErrorStatus> {
        match self {
            Self::Status { status, .. } => Some(map_http_status(*status)),
            Self::Validation(_) => Some(ZoppliHttpErrorStatus::BadRequest),
            _ => None,
        }
    }

    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        if e.is_decode() {
            return Self::Malformed(redact_secrets(&e.to_string()).to_string());
        }
        Self::Network(redact_secrets(&e.to_string()).to_string())
    }
}

/// The remote authority as seen by the session manager.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, payload: &LoginPayload) -> Result<CredentialPair, ApiError>;
    async fn register(&self, payload: &RegisterPayload) -> Result<String, ApiError>;
    /// Returns the new access token; the refresh token is not rotated.
    async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError>;
    async fn logout(&self, access_token: &str) -> Result<(), ApiError>;
}

fn build_headers(access_token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("zoppli/", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(token) = access_token.map(str::trim).filter(|s| !s.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }
    headers
}

fn read_string(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Pulls the human-readable reason out of an error body (`error` or `message`).
fn error_message(body: &Value) -> Option<String> {
    read_string(body.get("error")).or_else(|| read_string(body.get("message")))
}

/// Non-2xx body to error. The server may echo submitted secrets back.
fn status_error(status: u16, body: &Value) -> ApiError {
    ApiError::Status {
        status,
        message: error_message(body).map(|m| redact_secrets(&m).into_owned()),
    }
}

fn register_error(status: u16, body: &Value) -> ApiError {
    if status == 400 {
        if let Some(errors) = field_errors(body) {
            return ApiError::Validation(errors);
        }
    }
    status_error(status, body)
}

fn field_errors(body: &Value) -> Option<Vec<FieldError>> {
    let arr = body.get("error")?.as_array()?;
    let errors: Vec<FieldError> = arr
        .iter()
        .filter_map(|entry| {
            let message = read_string(entry.get("message"))?;
            let path = read_string(entry.get("path")).unwrap_or_default();
            Some(FieldError { path, message })
        })
        .collect();
    (!errors.is_empty()).then_some(errors)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    success: bool,
    user: Option<User>,
}

fn parse_me_response(json: Value) -> Result<User, ApiError> {
    let parsed: MeResponse =
        serde_json::from_value(json).map_err(|e| ApiError::Malformed(e.to_string()))?;
    match parsed {
        MeResponse {
            success: true,
            user: Some(user),
        } => Ok(user),
        _ => Err(ApiError::Malformed("user payload missing".to_string())),
    }
}

fn require_token(value: String, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Malformed(format!("{field} is empty")));
    }
    Ok(trimmed.to_string())
}

pub struct ZoppliApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ZoppliApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(connect_timeout)
                .build()?,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let body: Value = res.json().await.unwrap_or(Value::Null);
        Err(status_error(status.as_u16(), &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: Option<&str>,
    ) -> Result<T, ApiError> {
        let res = self
            .send(self.http.get(self.url(path)).headers(build_headers(access_token)))
            .await?;
        Ok(res.json::<T>().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: Option<&str>,
        body: &Value,
    ) -> Result<T, ApiError> {
        let res = self
            .send(
                self.http
                    .post(self.url(path))
                    .headers(build_headers(access_token))
                    .json(body),
            )
            .await?;
        Ok(res.json::<T>().await?)
    }

    async fn post_empty(&self, path: &str, body: &Value) -> Result<(), ApiError> {
        self.send(self.http.post(self.url(path)).headers(build_headers(None)).json(body))
            .await?;
        Ok(())
    }

    pub async fn fetch_me(&self, access_token: &str) -> Result<User, ApiError> {
        let json: Value = self.get_json("/user/me", Some(access_token)).await?;
        parse_me_response(json)
    }

    pub async fn list_restaurants(
        &self,
        page: u32,
        limit: u32,
        access_token: Option<&str>,
    ) -> Result<Vec<RestaurantSummary>, ApiError> {
        let path = format!(
            "/restaurant?page={}&limit={}",
            urlencoding::encode(&page.max(1).to_string()),
            urlencoding::encode(&limit.max(1).to_string())
        );
        self.get_json(&path, access_token).await
    }

    pub async fn get_restaurant(&self, restaurant_id: &str) -> Result<RestaurantDetail, ApiError> {
        let path = format!("/restaurant/{}", urlencoding::encode(restaurant_id.trim()));
        self.get_json(&path, None).await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), ApiError> {
        self.post_empty("/auth/reset-password-request", &json!({"email": email.trim()}))
            .await
    }

    pub async fn reset_password(&self, otp: &str, new_password: &str) -> Result<(), ApiError> {
        self.post_empty(
            "/auth/reset-password",
            &json!({"otp": otp.trim(), "newPassword": new_password}),
        )
        .await
    }
}

#[async_trait]
impl AuthApi for ZoppliApiClient {
    async fn login(&self, payload: &LoginPayload) -> Result<CredentialPair, ApiError> {
        let body = json!({"email": payload.email.trim(), "password": payload.password});
        let pair: CredentialPair = self.post_json("/auth/login", None, &body).await?;
        Ok(CredentialPair {
            access_token: require_token(pair.access_token, "accessToken")?,
            refresh_token: require_token(pair.refresh_token, "refreshToken")?,
        })
    }

    async fn register(&self, payload: &RegisterPayload) -> Result<String, ApiError> {
        let body = serde_json::to_value(payload).map_err(|e| ApiError::Malformed(e.to_string()))?;
        let req = self
            .http
            .post(self.url("/auth/register"))
            .headers(build_headers(None))
            .json(&body);
        let res = req.send().await?;
        let status = res.status();
        let json: Value = res.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            let parsed: MessageResponse = serde_json::from_value(json).unwrap_or(MessageResponse {
                message: None,
            });
            return Ok(parsed
                .message
                .unwrap_or_else(|| "Registration successful.".to_string()));
        }

        Err(register_error(status.as_u16(), &json))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError> {
        let body = json!({"token": refresh_token});
        let parsed: RefreshResponse = self.post_json("/auth/refresh-token", None, &body).await?;
        require_token(parsed.access_token, "accessToken")
    }

    async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        self.send(
            self.http
                .post(self.url("/auth/logout"))
                .headers(build_headers(Some(access_token)))
                .json(&json!({})),
        )
        .await?;
        Ok(())
    }
}

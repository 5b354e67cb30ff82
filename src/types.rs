use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NoSession,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub state: SessionState,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub user_type: String,
    pub password: String,
}

impl RegisterPayload {
    pub fn customer(name: &str, email: &str, phone_number: &str, password: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            phone_number: phone_number.trim().to_string(),
            user_type: "customer".to_string(),
            password: password.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub user_photo: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub business_type: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub delivery_time_estimate: Option<u32>,
    #[serde(rename = "address_id", default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dish {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantDetail {
    #[serde(flatten)]
    pub summary: RestaurantSummary,
    #[serde(default)]
    pub dishes: Vec<Dish>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcErrorCode {
    NoSession,
    SessionExpired,
    InvalidCredentials,
    Unverified,
    Validation,
    Network,
    Server,
    Storage,
    Unknown,
}

impl IpcErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "NO_SESSION",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Unverified => "UNVERIFIED",
            Self::Validation => "VALIDATION",
            Self::Network => "NETWORK",
            Self::Server => "SERVER",
            Self::Storage => "STORAGE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<IpcErrorCode> for String {
    fn from(code: IpcErrorCode) -> Self {
        code.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcResult<T> {
    Ok { ok: bool, value: T },
    Err { ok: bool, error: IpcError },
}

impl<T> IpcResult<T> {
    pub fn ok(value: T) -> Self {
        Self::Ok { ok: true, value }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Err {
            ok: false,
            error: IpcError {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Err { error, .. } => Some(error.code.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_result_serializes_with_ok_flag() {
        let ok = serde_json::to_value(IpcResult::ok(5)).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "value": 5}));

        let err = serde_json::to_value(IpcResult::<()>::err(IpcErrorCode::NoSession, "Log in."))
            .unwrap();
        assert_eq!(
            err,
            serde_json::json!({"ok": false, "error": {"code": "NO_SESSION", "message": "Log in."}})
        );
    }

    #[test]
    fn restaurant_detail_reads_backend_shape() {
        let data = include_str!("fixtures/restaurant_detail_ok.json");
        let detail: RestaurantDetail = serde_json::from_str(data).unwrap();
        assert_eq!(detail.summary.name, "Green Bowl");
        assert_eq!(
            detail.summary.address.as_ref().and_then(|a| a.city.as_deref()),
            Some("Lagos")
        );
        assert_eq!(detail.dishes.len(), 2);
        assert_eq!(detail.dishes[1].price, 7.25);
    }
}

use crate::api::DEFAULT_BASE_URL;
use crate::state::JsonFileStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "zoppli";
const SETTINGS_STORE_FILE: &str = "zoppli-settings.json";
const SESSION_STORE_FILE: &str = "zoppli-session.json";

pub const KEY_API_BASE_URL: &str = "apiBaseUrl";
pub const KEY_REQUEST_TIMEOUT_SECONDS: &str = "requestTimeoutSeconds";
pub const KEY_CONNECT_TIMEOUT_SECONDS: &str = "connectTimeoutSeconds";
pub const KEY_REFRESH_TIMEOUT_SECONDS: &str = "refreshTimeoutSeconds";
pub const KEY_TOKEN_STORE: &str = "tokenStore";
pub const KEY_RESTAURANTS_PAGE_SIZE: &str = "restaurantsPageSize";

pub const KNOWN_KEYS: [&str; 6] = [
    KEY_API_BASE_URL,
    KEY_REQUEST_TIMEOUT_SECONDS,
    KEY_CONNECT_TIMEOUT_SECONDS,
    KEY_REFRESH_TIMEOUT_SECONDS,
    KEY_TOKEN_STORE,
    KEY_RESTAURANTS_PAGE_SIZE,
];

fn defaults() -> HashMap<&'static str, Value> {
    HashMap::from([
        (KEY_API_BASE_URL, json!(DEFAULT_BASE_URL)),
        (KEY_REQUEST_TIMEOUT_SECONDS, json!(40)),
        (KEY_CONNECT_TIMEOUT_SECONDS, json!(10)),
        (KEY_REFRESH_TIMEOUT_SECONDS, json!(15)),
        (KEY_TOKEN_STORE, json!("file")),
        (KEY_RESTAURANTS_PAGE_SIZE, json!(10)),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TokenStoreKind {
    File,
    Keyring,
    Memory,
}

impl TokenStoreKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "keyring" => Some(Self::Keyring),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(SETTINGS_STORE_FILE)
}

pub fn default_session_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(SESSION_STORE_FILE)
}

pub struct SettingsStore {
    store: JsonFileStore,
    defaults: HashMap<&'static str, Value>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        Ok(Self {
            store: JsonFileStore::open(path)?,
            defaults: defaults(),
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.store.get(key).or_else(|| self.defaults.get(key).cloned())
    }

    pub fn get_u64(&self, key: &str, fallback: u64) -> u64 {
        self.value(key).and_then(|v| v.as_u64()).unwrap_or(fallback)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        let v = self.value(key)?;
        let s = v.as_str()?.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> std::io::Result<()> {
        self.store.set(key, value)
    }

    pub fn remove(&self, key: &str) -> std::io::Result<()> {
        self.store.remove(key)
    }

    /// Effective values, stored entries layered over defaults.
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        KNOWN_KEYS
            .iter()
            .filter_map(|key| Some((key.to_string(), self.value(key)?)))
            .collect()
    }

    pub fn api_base_url(&self) -> String {
        self.get_string(KEY_API_BASE_URL)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64(KEY_REQUEST_TIMEOUT_SECONDS, 40).max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64(KEY_CONNECT_TIMEOUT_SECONDS, 10).max(1))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64(KEY_REFRESH_TIMEOUT_SECONDS, 15).max(1))
    }

    pub fn token_store_kind(&self) -> TokenStoreKind {
        self.get_string(KEY_TOKEN_STORE)
            .and_then(|s| TokenStoreKind::parse(&s))
            .unwrap_or(TokenStoreKind::File)
    }

    pub fn restaurants_page_size(&self) -> u32 {
        self.get_u64(KEY_RESTAURANTS_PAGE_SIZE, 10).clamp(1, 50) as u32
    }
}

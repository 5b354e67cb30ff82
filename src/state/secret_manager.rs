use super::json_store::JsonFileStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

const KEYRING_SERVICE: &str = "com.zoppli.client";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKey {
    Access,
    Refresh,
}

impl TokenKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "accessToken",
            Self::Refresh => "refreshToken",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("OS keychain/secret service is unavailable")]
    Unavailable,
    #[error("token store i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted key/value storage for the credential pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: TokenKey) -> Result<(), StoreError>;
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// OS keychain backend with a write-through in-memory cache.
#[derive(Clone)]
pub struct KeyringTokenStore {
    in_memory: Arc<Mutex<HashMap<TokenKey, String>>>,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            in_memory: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entry(key: TokenKey) -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(KEYRING_SERVICE, key.as_str())
    }

    pub fn is_available(&self) -> bool {
        let Ok(entry) = Self::entry(TokenKey::Refresh) else {
            return false;
        };

        match entry.get_password() {
            Ok(_) => true,
            Err(keyring::Error::NoEntry) => true,
            Err(keyring::Error::BadEncoding(_)) => true,
            Err(keyring::Error::Ambiguous(_)) => true,
            Err(_) => false,
        }
    }
}

impl KeyringTokenStore {
    /// The cached copy goes only once the keychain entry is gone, so a failed
    /// delete cannot hide a token that would resurface on the next launch.
    async fn settle_removal(
        &self,
        key: TokenKey,
        deleted: Result<(), keyring::Error>,
    ) -> Result<(), StoreError> {
        match deleted {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                self.in_memory.lock().await.remove(&key);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key = key.as_str(), error = %e, "keychain entry left behind");
                Err(StoreError::Unavailable)
            }
        }
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        if let Some(value) = self.in_memory.lock().await.get(&key).cloned() {
            return Ok(Some(value));
        }

        let entry = Self::entry(key).map_err(|_| StoreError::Unavailable)?;
        match entry.get_password() {
            Ok(pwd) => {
                let Some(value) = non_empty(&pwd) else {
                    return Ok(None);
                };
                self.in_memory.lock().await.insert(key, value.clone());
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(_)) => Err(StoreError::Unavailable),
            Err(keyring::Error::PlatformFailure(_)) => Err(StoreError::Unavailable),
            Err(_) => Ok(None),
        }
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        let entry = Self::entry(key).map_err(|_| StoreError::Unavailable)?;
        entry
            .set_password(value)
            .map_err(|_| StoreError::Unavailable)?;
        self.in_memory.lock().await.insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<(), StoreError> {
        let deleted = Self::entry(key).and_then(|entry| entry.delete_credential());
        self.settle_removal(key, deleted).await
    }
}

/// JSON file backend, the plain key/value store that survives restarts.
pub struct FileTokenStore {
    file: JsonFileStore,
}

impl FileTokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            file: JsonFileStore::open(path)?,
        })
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        Ok(self
            .file
            .get(key.as_str())
            .and_then(|v| v.as_str().and_then(non_empty)))
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        self.file.set(key.as_str(), value)?;
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<(), StoreError> {
        self.file.remove(key.as_str())?;
        Ok(())
    }
}

/// Process-lifetime storage; nothing is persisted.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    values: Arc<Mutex<HashMap<TokenKey, String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(access_token: &str, refresh_token: &str) -> Self {
        let values = HashMap::from([
            (TokenKey::Access, access_token.to_string()),
            (TokenKey::Refresh, refresh_token.to_string()),
        ]);
        Self {
            values: Arc::new(Mutex::new(values)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().await.get(&key).cloned())
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        self.values.lock().await.insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<(), StoreError> {
        self.values.lock().await.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyring_cache_survives_failed_delete() {
        let store = KeyringTokenStore::new();
        store
            .in_memory
            .lock()
            .await
            .insert(TokenKey::Refresh, "R1".to_string());

        let failed = Err(keyring::Error::NoStorageAccess("locked".into()));
        assert!(matches!(
            store.settle_removal(TokenKey::Refresh, failed).await,
            Err(StoreError::Unavailable)
        ));
        assert_eq!(
            store.in_memory.lock().await.get(&TokenKey::Refresh).map(String::as_str),
            Some("R1")
        );

        store
            .settle_removal(TokenKey::Refresh, Err(keyring::Error::NoEntry))
            .await
            .unwrap();
        assert!(store.in_memory.lock().await.is_empty());
    }

    #[tokio::test]
    async fn file_store_keeps_tokens_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zoppli-session.json");

        let store = FileTokenStore::open(&path).unwrap();
        store.set(TokenKey::Access, "A1").await.unwrap();
        store.set(TokenKey::Refresh, "R1").await.unwrap();
        drop(store);

        let reopened = FileTokenStore::open(&path).unwrap();
        assert_eq!(reopened.get(TokenKey::Access).await.unwrap().as_deref(), Some("A1"));
        assert_eq!(reopened.get(TokenKey::Refresh).await.unwrap().as_deref(), Some("R1"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"accessToken\""));
        assert!(raw.contains("\"refreshToken\""));
    }

    #[tokio::test]
    async fn file_store_treats_blank_values_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path().join("s.json")).unwrap();
        store.set(TokenKey::Access, "   ").await.unwrap();
        assert_eq!(store.get(TokenKey::Access).await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_remove_is_idempotent() {
        let store = MemoryTokenStore::with_pair("A1", "R1");
        store.remove(TokenKey::Access).await.unwrap();
        store.remove(TokenKey::Access).await.unwrap();
        assert_eq!(store.get(TokenKey::Access).await.unwrap(), None);
        assert_eq!(store.get(TokenKey::Refresh).await.unwrap().as_deref(), Some("R1"));
    }
}

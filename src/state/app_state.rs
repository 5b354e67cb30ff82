use super::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, StoreError, TokenStore};
use crate::api::{ApiError, ZoppliApiClient};
use crate::session::{SessionManager, SessionOptions};
use crate::settings::{default_session_path, SettingsStore, TokenStoreKind};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not build HTTP client: {0}")]
    Api(#[from] ApiError),
    #[error("could not open token store: {0}")]
    Store(#[from] StoreError),
}

/// Values that win over the persisted settings for this process only.
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    pub api_base_url: Option<String>,
    pub token_store: Option<TokenStoreKind>,
    pub session_file: Option<PathBuf>,
}

/// Everything the views need, passed to them explicitly.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub api: Arc<ZoppliApiClient>,
    pub session: SessionManager,
}

fn open_token_store(
    kind: TokenStoreKind,
    session_file: Option<PathBuf>,
) -> Result<Arc<dyn TokenStore>, StoreError> {
    Ok(match kind {
        TokenStoreKind::File => {
            let path = session_file.unwrap_or_else(default_session_path);
            tracing::debug!(path = %path.display(), "using file token store");
            Arc::new(FileTokenStore::open(path)?)
        }
        TokenStoreKind::Keyring => {
            let store = KeyringTokenStore::new();
            if !store.is_available() {
                return Err(StoreError::Unavailable);
            }
            Arc::new(store)
        }
        TokenStoreKind::Memory => Arc::new(MemoryTokenStore::new()),
    })
}

impl AppState {
    /// Must be called inside a tokio runtime (the session manager spawns its worker).
    pub fn build(settings: SettingsStore, overrides: ClientOverrides) -> Result<Self, StartupError> {
        let base_url = overrides
            .api_base_url
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| settings.api_base_url());
        let api = Arc::new(ZoppliApiClient::new(
            &base_url,
            settings.request_timeout(),
            settings.connect_timeout(),
        )?);

        let kind = overrides
            .token_store
            .unwrap_or_else(|| settings.token_store_kind());
        let store = open_token_store(kind, overrides.session_file)?;

        let session = SessionManager::new(
            store,
            api.clone(),
            SessionOptions {
                refresh_timeout: settings.refresh_timeout(),
            },
        );
        tracing::debug!(base_url = %api.base_url(), ?kind, "client state ready");

        Ok(Self {
            settings: Arc::new(settings),
            api,
            session,
        })
    }
}

mod app_state;
mod json_store;
mod refresh_bus;
mod secret_manager;

pub use app_state::{AppState, ClientOverrides, StartupError};
pub use json_store::JsonFileStore;
pub use refresh_bus::RefreshBus;
pub(crate) use refresh_bus::{RefreshOutcome, RefreshRequest};
pub use secret_manager::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, StoreError, TokenKey, TokenStore,
};

use super::policy::{classify_login_error, classify_register_error};
use super::refresh_worker::{spawn_refresh_worker, RefreshContext};
use super::{transition, SessionError};
use crate::api::AuthApi;
use crate::state::{RefreshBus, TokenKey, TokenStore};
use crate::token::{self, TokenClaims};
use crate::types::{CredentialPair, LoginPayload, RegisterPayload, SessionInfo, SessionState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound for a single refresh exchange. There is no retry.
    pub refresh_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(15),
        }
    }
}

/// Owns the persisted credential pair and is the only writer of its keys.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    api: Arc<dyn AuthApi>,
    refresh: RefreshBus,
    state: Arc<watch::Sender<SessionState>>,
    epoch: Arc<AtomicU64>,
}

impl SessionManager {
    /// Spawns the refresh worker, so this must run inside a tokio runtime.
    pub fn new(store: Arc<dyn TokenStore>, api: Arc<dyn AuthApi>, options: SessionOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::NoSession);
        let state = Arc::new(state);
        let epoch = Arc::new(AtomicU64::new(0));

        spawn_refresh_worker(
            RefreshContext {
                store: store.clone(),
                api: api.clone(),
                state: state.clone(),
                epoch: epoch.clone(),
                timeout: options.refresh_timeout,
            },
            rx,
        );

        Self {
            store,
            api,
            refresh: RefreshBus::new(tx),
            state,
            epoch,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn inspect(token: &str) -> Result<TokenClaims, SessionError> {
        token::decode_claims(token).map_err(|e| {
            tracing::debug!(error = %e, "access token claims unreadable");
            SessionError::TokenMalformed
        })
    }

    /// Returns the stored access token, refreshing it first when it has expired.
    pub async fn get_valid_access_token(&self) -> Result<String, SessionError> {
        let Some(access_token) = self.store.get(TokenKey::Access).await? else {
            transition(&self.state, SessionState::NoSession);
            return Err(SessionError::NoSession);
        };

        match Self::inspect(&access_token) {
            Ok(_) if !token::is_expired(&access_token) => {
                transition(&self.state, SessionState::Authenticated);
                return Ok(access_token);
            }
            Ok(_) => tracing::debug!("access token expired"),
            Err(e) => tracing::debug!(error = %e, "access token unusable"),
        }

        self.refresh.request(false).await
    }

    /// Exchanges the refresh token for a new access token, even if the current one is valid.
    pub async fn refresh(&self) -> Result<String, SessionError> {
        self.refresh.request(true).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair, SessionError> {
        let payload = LoginPayload {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let pair = self.api.login(&payload).await.map_err(|e| {
            tracing::info!(error = %e, "login rejected");
            classify_login_error(e)
        })?;

        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.persist(&pair).await {
            tracing::error!(error = %e, "failed to persist credentials after login");
            let _ = self.clear_local().await;
            transition(&self.state, SessionState::NoSession);
            return Err(e);
        }

        transition(&self.state, SessionState::Authenticated);
        tracing::info!("logged in");
        Ok(pair)
    }

    async fn persist(&self, pair: &CredentialPair) -> Result<(), SessionError> {
        self.store.set(TokenKey::Access, &pair.access_token).await?;
        self.store.set(TokenKey::Refresh, &pair.refresh_token).await?;
        Ok(())
    }

    /// Creates the account only; the server issues no tokens on registration.
    pub async fn register(&self, payload: &RegisterPayload) -> Result<String, SessionError> {
        self.api.register(payload).await.map_err(|e| {
            tracing::info!(error = %e, "registration rejected");
            classify_register_error(e)
        })
    }

    async fn remote_logout(&self, access_token: &str) -> Result<(), SessionError> {
        self.api
            .logout(access_token)
            .await
            .map_err(|e| SessionError::LogoutFailed(e.to_string()))
    }

    async fn clear_local(&self) -> Result<(), SessionError> {
        let access = self.store.remove(TokenKey::Access).await;
        let refresh = self.store.remove(TokenKey::Refresh).await;
        access?;
        refresh?;
        Ok(())
    }

    /// Remote invalidation is best-effort; local credentials are always cleared.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        match self.store.get(TokenKey::Access).await {
            Ok(Some(access_token)) => {
                if let Err(e) = self.remote_logout(&access_token).await {
                    tracing::warn!(error = %e, "clearing local session anyway");
                }
            }
            Ok(None) => tracing::debug!("no access token; skipping remote logout"),
            Err(e) => tracing::warn!(error = %e, "could not read access token for logout"),
        }

        let cleared = self.clear_local().await;
        transition(&self.state, SessionState::NoSession);
        tracing::info!("logged out");
        cleared
    }

    /// Start-up check: decides whether the shell should land on login or browse.
    pub async fn resume(&self) -> SessionInfo {
        match self.get_valid_access_token().await {
            Ok(access_token) => SessionInfo {
                state: SessionState::Authenticated,
                expires_at: Self::inspect(&access_token)
                    .ok()
                    .and_then(|c| c.expires_at())
                    .and_then(token::rfc3339),
            },
            Err(e) => {
                tracing::info!(error = %e, "no usable session on resume");
                SessionInfo {
                    state: SessionState::NoSession,
                    expires_at: None,
                }
            }
        }
    }
}

use super::policy::{classify_refresh_error, clear_scope, ClearScope};
use super::{transition, RefreshFailure, SessionError};
use crate::api::AuthApi;
use crate::state::{RefreshOutcome, RefreshRequest, TokenKey, TokenStore};
use crate::token;
use crate::types::SessionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub(crate) struct RefreshContext {
    pub(crate) store: Arc<dyn TokenStore>,
    pub(crate) api: Arc<dyn AuthApi>,
    pub(crate) state: Arc<watch::Sender<SessionState>>,
    /// Bumped by login/logout; an exchange that straddles a bump is discarded.
    pub(crate) epoch: Arc<AtomicU64>,
    pub(crate) timeout: Duration,
}

async fn clear(ctx: &RefreshContext, scope: ClearScope) {
    if let Err(e) = ctx.store.remove(TokenKey::Access).await {
        tracing::warn!(error = %e, "failed to clear access token");
    }
    if scope == ClearScope::Both {
        if let Err(e) = ctx.store.remove(TokenKey::Refresh).await {
            tracing::warn!(error = %e, "failed to clear refresh token");
        }
    }
}

/// Whether a batch was answered by a network exchange or from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Exchanged,
    Skipped,
}

enum Plan {
    Answer(RefreshOutcome),
    Exchange(String),
}

async fn plan(ctx: &RefreshContext, force: bool) -> Result<Plan, SessionError> {
    let current = ctx.store.get(TokenKey::Access).await?;
    if !force {
        if let Some(current) = current.as_deref().filter(|t| !token::is_expired(t)) {
            return Ok(Plan::Answer(Ok(current.to_string())));
        }
    }

    let Some(refresh_token) = ctx.store.get(TokenKey::Refresh).await? else {
        if current.as_deref().is_some_and(token::is_expired) {
            clear(ctx, ClearScope::AccessOnly).await;
        }
        transition(&ctx.state, SessionState::NoSession);
        return Ok(Plan::Answer(Err(SessionError::NoSession)));
    };
    Ok(Plan::Exchange(refresh_token))
}

async fn refresh_once(ctx: &RefreshContext, force: bool) -> (RefreshOutcome, Attempt) {
    match plan(ctx, force).await {
        Ok(Plan::Exchange(refresh_token)) => {
            (exchange(ctx, &refresh_token).await, Attempt::Exchanged)
        }
        Ok(Plan::Answer(result)) => (result, Attempt::Skipped),
        Err(e) => (Err(e), Attempt::Skipped),
    }
}

async fn exchange(ctx: &RefreshContext, refresh_token: &str) -> RefreshOutcome {
    let epoch = ctx.epoch.load(Ordering::SeqCst);
    transition(&ctx.state, SessionState::Refreshing);
    tracing::info!("refreshing access token");

    let result = match tokio::time::timeout(ctx.timeout, ctx.api.refresh(refresh_token)).await {
        Ok(Ok(access_token)) => Ok(access_token),
        Ok(Err(e)) => Err(classify_refresh_error(&e)),
        Err(_) => Err(RefreshFailure::Timeout),
    };

    if ctx.epoch.load(Ordering::SeqCst) != epoch {
        tracing::info!("session changed during refresh; discarding exchange result");
        return match ctx.store.get(TokenKey::Access).await? {
            Some(token) => Ok(token),
            None => Err(SessionError::NoSession),
        };
    }

    match result {
        Ok(access_token) => {
            if let Err(e) = ctx.store.set(TokenKey::Access, &access_token).await {
                tracing::error!(error = %e, "failed to persist refreshed access token");
                transition(&ctx.state, SessionState::NoSession);
                return Err(e.into());
            }
            transition(&ctx.state, SessionState::Authenticated);
            tracing::info!("access token refreshed");
            Ok(access_token)
        }
        Err(failure) => {
            let scope = clear_scope(&failure);
            tracing::warn!(%failure, ?scope, "access token refresh failed");
            clear(ctx, scope).await;
            transition(&ctx.state, SessionState::NoSession);
            Err(SessionError::RefreshFailed(failure))
        }
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<RefreshRequest>, batch: &mut Vec<RefreshRequest>) {
    while let Ok(req) = rx.try_recv() {
        batch.push(req);
    }
}

/// Splits requests that queued up while a batch was answered. After a real
/// exchange they all share its outcome. After a skipped one, forced requests
/// still need an exchange of their own and are held for the next batch.
fn settle_late(
    late: Vec<RefreshRequest>,
    attempt: Attempt,
) -> (Vec<RefreshRequest>, Vec<RefreshRequest>) {
    match attempt {
        Attempt::Exchanged => (late, Vec::new()),
        Attempt::Skipped => late.into_iter().partition(|r| !r.force),
    }
}

/// Runs every refresh exchange. Requests that queue up while one is in flight
/// receive that exchange's outcome instead of starting another.
pub(crate) fn spawn_refresh_worker(
    ctx: RefreshContext,
    mut rx: mpsc::UnboundedReceiver<RefreshRequest>,
) {
    tokio::spawn(async move {
        let mut carried: Vec<RefreshRequest> = Vec::new();
        loop {
            let mut batch = std::mem::take(&mut carried);
            if batch.is_empty() {
                let Some(first) = rx.recv().await else {
                    break;
                };
                batch.push(first);
            }
            drain(&mut rx, &mut batch);

            let force = batch.iter().any(|r| r.force);
            let (result, attempt) = refresh_once(&ctx, force).await;

            let mut late = Vec::new();
            drain(&mut rx, &mut late);
            let (answered, held) = settle_late(late, attempt);
            batch.extend(answered);
            if !held.is_empty() {
                tracing::debug!(held = held.len(), "forced refresh deferred to next exchange");
            }
            carried = held;

            if batch.len() > 1 {
                tracing::debug!(waiters = batch.len(), "coalesced refresh requests");
            }
            for req in batch {
                let _ = req.respond_to.send(result.clone());
            }
        }
        tracing::debug!("refresh worker stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::state::{MemoryTokenStore, RefreshBus, StoreError};
    use crate::token::testing::token_expiring_in;
    use crate::types::{CredentialPair, LoginPayload, RegisterPayload};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Memory store whose access-token reads take a while.
    struct SlowReadStore {
        inner: MemoryTokenStore,
        delay: Duration,
    }

    #[async_trait]
    impl TokenStore for SlowReadStore {
        async fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
            if key == TokenKey::Access {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: TokenKey) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
    }

    struct CountingApi {
        refresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthApi for CountingApi {
        async fn login(&self, _payload: &LoginPayload) -> Result<CredentialPair, ApiError> {
            Err(ApiError::Network("unused".to_string()))
        }

        async fn register(&self, _payload: &RegisterPayload) -> Result<String, ApiError> {
            Err(ApiError::Network("unused".to_string()))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<String, ApiError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok("A2".to_string())
        }

        async fn logout(&self, _access_token: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forced_request_behind_skipped_batch_gets_own_exchange() {
        let valid = token_expiring_in(600);
        let store = Arc::new(SlowReadStore {
            inner: MemoryTokenStore::with_pair(&valid, "R1"),
            delay: Duration::from_millis(100),
        });
        let api = Arc::new(CountingApi {
            refresh_calls: AtomicUsize::new(0),
        });
        let (state, _) = watch::channel(SessionState::Authenticated);
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_refresh_worker(
            RefreshContext {
                store: store.clone(),
                api: api.clone(),
                state: Arc::new(state),
                epoch: Arc::new(AtomicU64::new(0)),
                timeout: Duration::from_secs(5),
            },
            rx,
        );
        let bus = RefreshBus::new(tx);

        let plain = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.request(false).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let forced = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.request(true).await })
        };

        assert_eq!(plain.await.unwrap(), Ok(valid));
        assert_eq!(forced.await.unwrap(), Ok("A2".to_string()));
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.inner.get(TokenKey::Access).await.unwrap().as_deref(),
            Some("A2")
        );
    }

    #[test]
    fn late_requests_share_a_real_exchange() {
        let late = || {
            (0..3)
                .map(|i| {
                    let (respond_to, _) = tokio::sync::oneshot::channel();
                    RefreshRequest {
                        force: i == 1,
                        respond_to,
                    }
                })
                .collect::<Vec<_>>()
        };

        let (answered, held) = settle_late(late(), Attempt::Exchanged);
        assert_eq!((answered.len(), held.len()), (3, 0));

        let (answered, held) = settle_late(late(), Attempt::Skipped);
        assert_eq!((answered.len(), held.len()), (2, 1));
        assert!(held[0].force);
    }
}

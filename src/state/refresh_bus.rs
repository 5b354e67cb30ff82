use crate::session::SessionError;
use tokio::sync::{mpsc, oneshot};

pub(crate) type RefreshOutcome = Result<String, SessionError>;

#[derive(Clone)]
pub struct RefreshBus {
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

pub(crate) struct RefreshRequest {
    /// Skip the "stored token is still valid" shortcut.
    pub(crate) force: bool,
    pub(crate) respond_to: oneshot::Sender<RefreshOutcome>,
}

impl RefreshBus {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RefreshRequest>) -> Self {
        Self { tx }
    }

    pub(crate) async fn request(&self, force: bool) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(RefreshRequest {
                force,
                respond_to: tx,
            })
            .is_err()
        {
            return Err(SessionError::Internal("Refresh worker is not available.".to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(SessionError::Internal("Refresh worker failed.".to_string())))
    }
}

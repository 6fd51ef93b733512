//! Pairing a waiting flow with an out-of-band HTTP callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::RendezvousError;

/// What a successful callback carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub code: String,
    pub state: Option<String>,
}

/// Outcome handed from the callback listener to the waiting flow.
pub type Delivery = Result<Callback, RendezvousError>;

struct Session {
    id: u64,
    tx: oneshot::Sender<Delivery>,
}

/// Registry of flows waiting for a provider callback.
///
/// At most one session exists per provider. A session is removed as soon as
/// it resolves, whether by delivery, cancellation, deadline or drop.
#[derive(Default)]
pub struct Rendezvous {
    sessions: Mutex<HashMap<String, Session>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Rendezvous {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<String> = self.sessions().keys().cloned().collect();
        f.debug_struct("Rendezvous").field("waiting", &providers).finish_non_exhaustive()
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a session for `provider`.
    ///
    /// Call this before sending the user to the provider so an early redirect
    /// is not lost.
    pub fn register(&self, provider: &str) -> Result<PendingCallback<'_>, RendezvousError> {
        let mut sessions = self.sessions();
        if sessions.get(provider).is_some_and(|session| !session.tx.is_closed()) {
            return Err(RendezvousError::SessionActive(provider.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(provider.to_string(), Session { id, tx });
        debug!(%provider, session = id, "Registered callback session");

        Ok(PendingCallback { rendezvous: self, provider: provider.to_string(), id, rx: Some(rx) })
    }

    /// Hands `delivery` to the flow waiting on `provider` without blocking.
    ///
    /// Returns false, dropping the delivery, when nobody is waiting.
    pub fn deliver(&self, provider: &str, delivery: Delivery) -> bool {
        let Some(session) = self.sessions().remove(provider) else {
            warn!(%provider, "Callback arrived with no session waiting; dropped");
            return false;
        };
        let delivered = session.tx.send(delivery).is_ok();
        if !delivered {
            warn!(%provider, session = session.id, "Session ended before callback was delivered");
        }
        delivered
    }

    pub fn is_waiting(&self, provider: &str) -> bool {
        self.sessions().contains_key(provider)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// Registers a session and waits for its callback.
    pub async fn await_callback(
        &self,
        provider: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Callback, RendezvousError> {
        self.register(provider)?.wait(cancel, timeout).await
    }

    fn release(&self, provider: &str, id: u64) {
        let mut sessions = self.sessions();
        if sessions.get(provider).is_some_and(|session| session.id == id) {
            sessions.remove(provider);
            debug!(%provider, session = id, "Released callback session");
        }
    }
}

/// A registered session. Dropping it deregisters the session.
pub struct PendingCallback<'a> {
    rendezvous: &'a Rendezvous,
    provider: String,
    id: u64,
    rx: Option<oneshot::Receiver<Delivery>>,
}

impl std::fmt::Debug for PendingCallback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallback")
            .field("provider", &self.provider)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PendingCallback<'_> {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Waits for delivery, cancellation or the deadline, whichever comes first.
    ///
    /// Cancellation is checked first, so an already-cancelled token never
    /// consumes a delivery.
    pub async fn wait(
        mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Callback, RendezvousError> {
        let Some(rx) = self.rx.take() else {
            return Err(RendezvousError::Cancelled(self.provider.clone()));
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(provider = %self.provider, "Callback wait cancelled");
                Err(RendezvousError::Cancelled(self.provider.clone()))
            }
            delivery = rx => {
                delivery.unwrap_or_else(|_| Err(RendezvousError::Cancelled(self.provider.clone())))
            }
            () = tokio::time::sleep(timeout) => {
                warn!(provider = %self.provider, timeout_secs = timeout.as_secs(), "Callback wait timed out");
                Err(RendezvousError::DeadlineExceeded(self.provider.clone()))
            }
        }
    }
}

impl Drop for PendingCallback<'_> {
    fn drop(&mut self) {
        self.rendezvous.release(&self.provider, self.id);
    }
}

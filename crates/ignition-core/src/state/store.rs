//! The single owner of cluster state.

use std::sync::Arc;

use chrono::Utc;
use ignition_abstraction::ConfigBundle;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, error};

use super::error::StoreResult;
use super::model::{ClusterSaveState, NodeCounts};
use super::persistence::{LoadedState, SnapshotPersistence};

#[derive(Debug, Default)]
struct StoreInner {
    state: ClusterSaveState,
    bundle: Option<ConfigBundle>,
}

/// Owns [`ClusterSaveState`] and the config bundle behind one lock.
///
/// Every mutation goes through [`StoreGuard::commit`], which persists the new
/// state before it becomes visible in memory. A failed write therefore leaves
/// both views exactly as they were.
pub struct StateStore {
    inner: Mutex<StoreInner>,
    persistence: Arc<dyn SnapshotPersistence>,
    counts_tx: watch::Sender<NodeCounts>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("counts", &*self.counts_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a store with empty state. Nothing is written until the first commit.
    pub fn new(persistence: Arc<dyn SnapshotPersistence>) -> Self {
        Self::from_loaded(persistence, LoadedState::default())
    }

    /// Loads saved state, returning the store and whether a snapshot was found.
    ///
    /// Fails when the snapshot exists but cannot be fully recovered.
    pub fn open(persistence: Arc<dyn SnapshotPersistence>) -> StoreResult<(Self, bool)> {
        match persistence.load()? {
            Some(loaded) => Ok((Self::from_loaded(persistence, loaded), true)),
            None => Ok((Self::new(persistence), false)),
        }
    }

    fn from_loaded(persistence: Arc<dyn SnapshotPersistence>, loaded: LoadedState) -> Self {
        let (counts_tx, _) = watch::channel(loaded.state.counts());
        Self {
            inner: Mutex::new(StoreInner { state: loaded.state, bundle: loaded.bundle }),
            persistence,
            counts_tx,
        }
    }

    /// Acquires the store lock.
    pub async fn lock(&self) -> StoreGuard<'_> {
        StoreGuard { inner: self.inner.lock().await, store: self }
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> ClusterSaveState {
        self.inner.lock().await.state.clone()
    }

    /// A copy of the current bundle, if one has been created.
    pub async fn bundle(&self) -> Option<ConfigBundle> {
        self.inner.lock().await.bundle.clone()
    }

    /// Applies `mutate` to a copy of the state and commits it.
    pub async fn update<T>(&self, mutate: impl FnOnce(&mut ClusterSaveState) -> T) -> StoreResult<T> {
        let mut guard = self.lock().await;
        let mut next = guard.state().clone();
        let output = mutate(&mut next);
        let bundle = guard.bundle().cloned();
        guard.commit(next, bundle)?;
        Ok(output)
    }

    /// Removes all persisted state and empties the store.
    pub async fn reset(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        self.persistence.clear()?;
        *inner = StoreInner::default();
        self.counts_tx.send_replace(NodeCounts::default());
        Ok(())
    }

    /// Node counts, updated after every successful commit.
    pub fn subscribe(&self) -> watch::Receiver<NodeCounts> {
        self.counts_tx.subscribe()
    }

    pub fn counts(&self) -> NodeCounts {
        *self.counts_tx.borrow()
    }
}

/// Exclusive access to the store for a read-modify-commit sequence.
pub struct StoreGuard<'a> {
    inner: MutexGuard<'a, StoreInner>,
    store: &'a StateStore,
}

impl StoreGuard<'_> {
    pub fn state(&self) -> &ClusterSaveState {
        &self.inner.state
    }

    pub fn bundle(&self) -> Option<&ConfigBundle> {
        self.inner.bundle.as_ref()
    }

    /// Persists `state` and `bundle`, then makes them current.
    ///
    /// On a persistence failure nothing changes in memory.
    pub fn commit(&mut self, mut state: ClusterSaveState, bundle: Option<ConfigBundle>) -> StoreResult<()> {
        state.updated_at = Some(Utc::now());
        if let Err(e) = self.store.persistence.save(&state, bundle.as_ref()) {
            error!(error = %e, "Failed to persist cluster state");
            return Err(e);
        }

        let counts = state.counts();
        self.inner.state = state;
        self.inner.bundle = bundle;
        self.store.counts_tx.send_if_modified(|current| {
            let changed = *current != counts;
            *current = counts;
            changed
        });
        debug!(
            control_planes = counts.control_planes,
            workers = counts.workers,
            "Committed cluster state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::error::StoreError;
    use crate::state::persistence::FileSnapshotStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Persistence that can be told to reject writes.
    #[derive(Default)]
    struct Flaky {
        fail: AtomicBool,
        saved: std::sync::Mutex<Option<ClusterSaveState>>,
    }

    impl SnapshotPersistence for Flaky {
        fn load(&self) -> StoreResult<Option<LoadedState>> {
            Ok(None)
        }

        fn save(&self, state: &ClusterSaveState, _bundle: Option<&ConfigBundle>) -> StoreResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Rejected("disk full".to_string()));
            }
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }

        fn clear(&self) -> StoreResult<()> {
            *self.saved.lock().unwrap() = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_update_persists_before_applying() {
        let persistence = Arc::new(Flaky::default());
        let store = StateStore::new(persistence.clone());

        store.update(|state| state.bootstrapped = true).await.unwrap();
        assert!(store.snapshot().await.bootstrapped);
        assert!(persistence.saved.lock().unwrap().as_ref().unwrap().bootstrapped);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let persistence = Arc::new(Flaky::default());
        let store = StateStore::new(persistence.clone());
        persistence.fail.store(true, Ordering::SeqCst);

        let result = store
            .update(|state| state.machine_disks.insert("u1".to_string(), "/dev/vda".to_string()))
            .await;
        assert!(result.is_err());
        assert!(store.snapshot().await.machine_disks.is_empty());
    }

    #[tokio::test]
    async fn test_open_reports_found() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = Arc::new(FileSnapshotStore::new(temp_dir.path()));

        let (store, found) = StateStore::open(persistence.clone()).unwrap();
        assert!(!found);
        store.update(|state| state.bootstrapped = true).await.unwrap();

        // Simulate restart by opening a new store over the same directory.
        let (restored, found) = StateStore::open(persistence).unwrap();
        assert!(found);
        assert!(restored.snapshot().await.bootstrapped);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = Arc::new(FileSnapshotStore::new(temp_dir.path()));
        let store = StateStore::new(persistence.clone());
        store.update(|state| state.bootstrapped = true).await.unwrap();

        store.reset().await.unwrap();
        assert_eq!(store.snapshot().await, ClusterSaveState::default());
        assert!(persistence.load().unwrap().is_none());
    }
}

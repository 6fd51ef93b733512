//! Durable cluster state.
//!
//! [`StateStore`] owns the [`ClusterSaveState`] and the config bundle. It is
//! created once at startup and shared by reference with the issuance service
//! and the orchestrator.

pub mod error;
pub mod model;
pub mod persistence;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use model::{ClusterSaveState, NodeCounts, NodeRecord};
pub use persistence::{FileSnapshotStore, LoadedState, SNAPSHOT_FILE, SnapshotPersistence};
pub use store::{StateStore, StoreGuard};

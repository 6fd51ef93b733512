//! Command implementations for the Ignition CLI.

pub mod disk;
pub mod reset;
pub mod run;
pub mod schema;
pub mod status;

use std::sync::Arc;

use anyhow::Context;
use ignition_core::{Config, FileSnapshotStore, StateStore};

/// Opens the saved state under the configured state directory.
///
/// Fails when a snapshot exists but its bundle is incomplete.
pub fn open_store(config: &Config) -> anyhow::Result<(Arc<StateStore>, bool)> {
    let persistence = Arc::new(FileSnapshotStore::new(&config.state_dir));
    let (store, found) = StateStore::open(persistence)
        .with_context(|| format!("Failed to load state from {}", config.state_dir.display()))?;
    Ok((Arc::new(store), found))
}

//! Snapshot persistence for cluster state.
//!
//! The whole [`ClusterSaveState`] is rewritten on every mutation. Bundle
//! documents live next to the snapshot as individual files so operators can
//! pick up `talosconfig` directly.

use std::fs;
use std::path::{Path, PathBuf};

use ignition_abstraction::ConfigBundle;
use tracing::{debug, warn};

use super::error::{StoreError, StoreResult};
use super::model::ClusterSaveState;

/// File name of the JSON snapshot inside the state directory.
pub const SNAPSHOT_FILE: &str = "bootstrap-state.json";

/// State and bundle as read back from durable storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedState {
    pub state: ClusterSaveState,
    pub bundle: Option<ConfigBundle>,
}

/// Durable storage for the snapshot and its bundle blobs.
pub trait SnapshotPersistence: Send + Sync {
    /// Returns `None` when no snapshot has been written yet.
    ///
    /// A snapshot whose bundle blobs cannot all be read back is an error; the
    /// two are only ever recovered together. Blobs are ignored while the
    /// snapshot has no control plane.
    fn load(&self) -> StoreResult<Option<LoadedState>>;

    /// Writes the bundle blobs (if any) and then the snapshot.
    fn save(&self, state: &ClusterSaveState, bundle: Option<&ConfigBundle>) -> StoreResult<()>;

    /// Removes all persisted state.
    fn clear(&self) -> StoreResult<()>;
}

/// Stores the snapshot and bundle as files under one directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn ensure_dir(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))
    }

    /// Writes `contents` to `name` atomically (write to temp, then rename).
    fn write_atomic(&self, name: &str, contents: &[u8]) -> StoreResult<()> {
        let path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{}.tmp", name));
        fs::write(&temp_path, contents).map_err(|e| StoreError::io(&temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| StoreError::io(&path, e))
    }

    fn load_bundle(&self) -> StoreResult<(ConfigBundle, Vec<String>)> {
        let mut bundle = ConfigBundle::new();
        let mut missing = Vec::new();
        for name in ConfigBundle::REQUIRED {
            let path = self.dir.join(name);
            match fs::read(&path) {
                Ok(contents) => bundle.insert(name, contents),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => missing.push(name.to_string()),
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok((bundle, missing))
    }
}

impl SnapshotPersistence for FileSnapshotStore {
    fn load(&self) -> StoreResult<Option<LoadedState>> {
        let snapshot_path = self.snapshot_path();
        let json = match fs::read_to_string(&snapshot_path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %snapshot_path.display(), "No saved state found");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(snapshot_path, e)),
        };
        let state: ClusterSaveState = serde_json::from_str(&json)?;

        let (bundle, missing) = self.load_bundle()?;
        let bundle = if !state.has_control_plane() {
            // Blobs without a control plane belong to an assignment whose
            // snapshot never landed. The next first requester gets a new bundle.
            if !bundle.is_empty() {
                warn!(path = %self.dir.display(), "Discarding bundle documents with no saved control plane");
            }
            None
        } else if missing.is_empty() {
            Some(bundle)
        } else {
            warn!(?missing, "Saved state references bundle documents that are missing");
            return Err(StoreError::PartialState { missing });
        };

        debug!(
            path = %snapshot_path.display(),
            nodes = state.node_records.len(),
            has_bundle = bundle.is_some(),
            "Loaded saved state"
        );
        Ok(Some(LoadedState { state, bundle }))
    }

    fn save(&self, state: &ClusterSaveState, bundle: Option<&ConfigBundle>) -> StoreResult<()> {
        self.ensure_dir()?;
        if let Some(bundle) = bundle {
            for (name, contents) in bundle.iter() {
                self.write_atomic(name, contents)?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        self.write_atomic(SNAPSHOT_FILE, json.as_bytes())
    }

    fn clear(&self) -> StoreResult<()> {
        for name in std::iter::once(SNAPSHOT_FILE).chain(ConfigBundle::REQUIRED) {
            let path = self.dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed state file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok(())
    }
}

//! Secret sink that writes Kubernetes `Secret` manifests to disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ignition_abstraction::{SecretData, SecretError, SecretSink};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::bootstrap::write_private;

/// Subdirectory of the state directory holding secret manifests.
pub const SECRETS_DIR: &str = "secrets";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretManifest {
    api_version: String,
    kind: String,
    metadata: Metadata,
    #[serde(rename = "type", default = "opaque")]
    secret_type: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    name: String,
    namespace: String,
}

fn opaque() -> String {
    "Opaque".to_string()
}

/// Writes each secret as `<dir>/<namespace>-<name>.yaml`, ready for
/// `kubectl apply`.
#[derive(Debug)]
pub struct FileSecretSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSecretSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    /// A sink writing under `<state_dir>/secrets`.
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(SECRETS_DIR))
    }

    pub fn manifest_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.dir.join(format!("{namespace}-{name}.yaml"))
    }

    /// Decoded contents of a stored secret.
    pub fn read(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, SecretError> {
        let path = self.manifest_path(namespace, name);
        if !path.exists() {
            return Ok(None);
        }
        let manifest = read_manifest(&path)?;
        manifest
            .data
            .into_iter()
            .map(|(key, value)| {
                let bytes = STANDARD.decode(value).map_err(|e| SecretError::Serialization(e.to_string()))?;
                let text = String::from_utf8(bytes).map_err(|e| SecretError::Serialization(e.to_string()))?;
                Ok((key, text))
            })
            .collect::<Result<SecretData, SecretError>>()
            .map(Some)
    }
}

fn read_manifest(path: &Path) -> Result<SecretManifest, SecretError> {
    let content = std::fs::read_to_string(path).map_err(|e| SecretError::Io(format!("{}: {e}", path.display())))?;
    serde_yaml::from_str(&content).map_err(|e| SecretError::Serialization(format!("{}: {e}", path.display())))
}

#[async_trait]
impl SecretSink for FileSecretSink {
    async fn put(&self, namespace: &str, name: &str, data: &SecretData) -> Result<(), SecretError> {
        if namespace.is_empty() || name.is_empty() || name.contains('/') || namespace.contains('/') {
            return Err(SecretError::Rejected(format!("invalid secret reference '{namespace}/{name}'")));
        }
        let _guard = self.write_lock.lock().await;

        let path = self.manifest_path(namespace, name);
        let mut manifest = if path.exists() {
            read_manifest(&path)?
        } else {
            SecretManifest {
                api_version: "v1".to_string(),
                kind: "Secret".to_string(),
                metadata: Metadata { name: name.to_string(), namespace: namespace.to_string() },
                secret_type: opaque(),
                data: BTreeMap::new(),
            }
        };
        for (key, value) in data {
            manifest.data.insert(key.clone(), STANDARD.encode(value));
        }

        let yaml = serde_yaml::to_string(&manifest).map_err(|e| SecretError::Serialization(e.to_string()))?;
        write_private(&path, yaml.as_bytes()).map_err(|e| SecretError::Io(format!("{}: {e}", path.display())))?;
        info!(%namespace, %name, keys = data.len(), path = %path.display(), outcome = "success", "Stored secret");
        Ok(())
    }
}

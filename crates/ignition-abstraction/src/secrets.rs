//! Credential storage in the target cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Key/value payload of one secret.
pub type SecretData = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The sink refused the secret.
    #[error("Secret rejected: {0}")]
    Rejected(String),
}

/// Destination for credentials created during bootstrap.
#[async_trait]
pub trait SecretSink: Send + Sync {
    /// Creates or updates `namespace/name`, merging `data` into existing keys.
    async fn put(&self, namespace: &str, name: &str, data: &SecretData) -> Result<(), SecretError>;
}

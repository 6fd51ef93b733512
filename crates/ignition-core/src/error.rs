//! Error types for Ignition Core.

use ignition_abstraction::{ClusterError, GenerationError, ImageError, SecretError};
use thiserror::Error;

use crate::bootstrap::{BootstrapError, HealthCheckError};
use crate::config::ConfigError;
use crate::issuance::IssuanceError;
use crate::rendezvous::RendezvousError;
use crate::state::StoreError;

/// Core error type for Ignition operations.
#[derive(Error, Debug)]
pub enum IgnitionError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State store errors
    #[error("State error: {0}")]
    Store(#[from] StoreError),

    /// Machine config issuance errors
    #[error("Issuance error: {0}")]
    Issuance(#[from] IssuanceError),

    /// Config generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Callback and OAuth errors
    #[error("Rendezvous error: {0}")]
    Rendezvous(#[from] RendezvousError),

    /// Cluster API errors
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Bootstrap errors
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// Health check errors
    #[error(transparent)]
    Health(#[from] HealthCheckError),

    /// Boot image errors
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// Secret sink errors
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ignition operations.
pub type Result<T> = std::result::Result<T, IgnitionError>;

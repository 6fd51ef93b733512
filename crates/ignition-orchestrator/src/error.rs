// Error types for the phase orchestrator

use ignition_abstraction::{ClusterError, ImageError, SecretError};
use ignition_core::bootstrap::{BootstrapError, HealthCheckError};
use ignition_core::config::ConfigError;
use ignition_core::rendezvous::RendezvousError;
use ignition_core::state::StoreError;
use thiserror::Error;

/// Result type for phase entry actions
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that end a phase, and with it the run
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid configuration or form input
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reading or writing cluster state failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// OAuth authorization did not complete
    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    /// Building the boot image failed
    #[error("Boot image error: {0}")]
    Image(#[from] ImageError),

    /// Connecting to the cluster failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Health(#[from] HealthCheckError),

    /// Writing credentials failed
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// A listener could not be started
    #[error("Failed to start {service} listener: {source}")]
    Listener {
        service: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The form could not be completed
    #[error("Form input failed: {0}")]
    Form(String),

    /// A phase needs cluster parameters that were never collected
    #[error("Cluster parameters have not been collected")]
    MissingParams,

    /// A phase needs the config bundle before any node was configured
    #[error("No configuration bundle has been generated yet")]
    MissingBundle,

    #[error("No control plane node has been configured")]
    NoControlPlane,

    /// The phase was cancelled
    #[error("Phase cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_errors_keep_their_message() {
        let err = OrchestratorError::from(HealthCheckError::TimeoutExceeded(std::time::Duration::from_secs(60)));
        assert_eq!(err.to_string(), "Cluster not healthy after 60s");

        let err = OrchestratorError::from(ConfigError::MissingField("cluster_name".to_string()));
        assert!(err.to_string().contains("cluster_name"));
    }

    #[test]
    fn test_listener_error_names_service() {
        let err = OrchestratorError::Listener {
            service: "issuance",
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(err.to_string(), "Failed to start issuance listener: address in use");
    }
}

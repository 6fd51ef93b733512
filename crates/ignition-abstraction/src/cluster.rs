//! Cluster API access used during bootstrap.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::bundle::ConfigBundle;

/// Errors reported by a cluster client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The endpoint could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Client credentials are missing or unusable.
    #[error("Credential error: {0}")]
    Credentials(String),

    /// The server rejected or failed the call.
    #[error("RPC failed: {0}")]
    Rpc(String),

    /// The server cancelled the call.
    #[error("Call cancelled by server")]
    Cancelled,

    /// The server answered with something we cannot interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// One message from a streaming health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// A check is still running or has passed.
    Progress { node: Option<String>, message: String },
    /// The server reported a failed check. Terminal.
    Failure { node: Option<String>, message: String },
    /// The server declared the cluster healthy. Terminal.
    Healthy,
}

/// Node addresses the health check should expect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterNodes {
    pub control_planes: Vec<String>,
    pub workers: Vec<String>,
}

/// Server-streamed health messages.
pub type HealthStream = BoxStream<'static, Result<HealthEvent, ClusterError>>;

/// Client for the booted cluster's management API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Starts etcd on the first control plane. Must be called once per cluster.
    async fn bootstrap(&self) -> Result<(), ClusterError>;

    /// Opens a health check over `nodes` that the server runs for at most
    /// `wait_timeout`.
    async fn health_check(
        &self,
        nodes: &ClusterNodes,
        wait_timeout: Duration,
    ) -> Result<HealthStream, ClusterError>;

    /// Retrieves an admin kubeconfig.
    async fn kubeconfig(&self) -> Result<Vec<u8>, ClusterError>;
}

/// Builds a [`ClusterClient`] from the bundle's client credentials.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(
        &self,
        bundle: &ConfigBundle,
        endpoint: IpAddr,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError>;
}

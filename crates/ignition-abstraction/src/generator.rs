//! Machine configuration generation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

use crate::bundle::{ConfigBundle, NodeRole};
use crate::params::ClusterParams;

/// Errors raised while creating a bundle or rendering a node configuration.
///
/// Generation failures are never cached: the node retries its boot request
/// and generation is attempted again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The cluster parameters cannot produce a valid configuration.
    #[error("Invalid cluster parameters: {0}")]
    InvalidParams(String),

    /// Creating cluster credentials failed.
    #[error("Credential generation failed: {0}")]
    Credentials(String),

    /// The bundle lacks a document the role needs.
    #[error("Bundle is missing document '{0}'")]
    MissingDocument(String),

    /// Serializing or patching a document failed.
    #[error("Render error: {0}")]
    Render(String),
}

/// Everything needed to render one node's configuration from the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub role: NodeRole,
    pub hostname: String,
    pub install_disk: String,
}

/// Produces cluster bundles and per-node configuration.
#[async_trait]
pub trait ConfigGenerator: Send + Sync {
    /// Creates the shared bundle for a new cluster whose first control plane
    /// is reachable at `control_plane_addr`.
    async fn create_bundle(
        &self,
        params: &ClusterParams,
        control_plane_addr: IpAddr,
    ) -> Result<ConfigBundle, GenerationError>;

    /// Renders the configuration for one node.
    async fn render(
        &self,
        bundle: &ConfigBundle,
        request: &RenderRequest,
    ) -> Result<Vec<u8>, GenerationError>;
}

//! Role assignment and configuration issuance for booting machines.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::Utc;
use ignition_abstraction::{ConfigGenerator, NodeRole, RenderRequest};
use tracing::{debug, info};

use super::error::IssuanceError;
use crate::state::{NodeRecord, StateStore};

/// Port of the Kubernetes API on control plane nodes.
pub const DEFAULT_KUBERNETES_PORT: u16 = 6443;

/// Configuration served to one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedConfig {
    pub role: NodeRole,
    pub hostname: String,
    pub config: Vec<u8>,
    /// False when the bytes were replayed from an existing record.
    pub created: bool,
}

/// Answers machine configuration requests against the shared [`StateStore`].
///
/// The first machine to ask becomes the control plane and every later one a
/// worker. A machine asking again gets exactly the bytes it got the first
/// time.
pub struct MachineConfigService {
    store: Arc<StateStore>,
    generator: Arc<dyn ConfigGenerator>,
    kubernetes_port: u16,
}

impl std::fmt::Debug for MachineConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineConfigService")
            .field("store", &self.store)
            .field("generator", &"<ConfigGenerator>")
            .field("kubernetes_port", &self.kubernetes_port)
            .finish()
    }
}

impl MachineConfigService {
    pub fn new(store: Arc<StateStore>, generator: Arc<dyn ConfigGenerator>) -> Self {
        Self { store, generator, kubernetes_port: DEFAULT_KUBERNETES_PORT }
    }

    #[must_use]
    pub fn with_kubernetes_port(mut self, port: u16) -> Self {
        self.kubernetes_port = port;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Returns the configuration for `identity_key`, assigning a role on first contact.
    ///
    /// The whole lookup, generation and commit runs under the store lock, so
    /// concurrent first requests are serialized and only one becomes the
    /// control plane. The record is persisted before the bytes are returned.
    pub async fn handle_request(
        &self,
        identity_key: &str,
        mac: &str,
        source: IpAddr,
    ) -> Result<IssuedConfig, IssuanceError> {
        if identity_key.trim().is_empty() {
            return Err(IssuanceError::MissingIdentity);
        }

        let mut guard = self.store.lock().await;

        if let Some(record) = guard.state().record(identity_key) {
            debug!(identity = %identity_key, hostname = %record.hostname, "Replaying issued config");
            return Ok(IssuedConfig {
                role: record.role,
                hostname: record.hostname.clone(),
                config: record.rendered_config.clone(),
                created: false,
            });
        }

        let params = guard.state().bootstrap_config.clone().ok_or(IssuanceError::MissingParams)?;
        let role = if guard.state().has_control_plane() {
            NodeRole::Worker
        } else {
            NodeRole::ControlPlane
        };
        let hostname = role.hostname(guard.state().count(role));

        let bundle = match guard.bundle() {
            Some(bundle) => bundle.clone(),
            None => {
                let control_plane_addr =
                    guard.state().first_control_plane().map_or(source, |record| record.address);
                info!(cluster = %params.cluster_name, %control_plane_addr, "Creating cluster config bundle");
                self.generator.create_bundle(&params, control_plane_addr).await?
            }
        };

        let request = RenderRequest {
            role,
            hostname: hostname.clone(),
            install_disk: guard.state().install_disk_for(identity_key, &params),
        };
        let config = self.generator.render(&bundle, &request).await?;

        let mut next = guard.state().clone();
        if role == NodeRole::ControlPlane && next.cluster_endpoint.is_none() {
            let endpoint = format!("https://{}", SocketAddr::new(source, self.kubernetes_port));
            info!(%endpoint, "Cluster endpoint established");
            next.cluster_endpoint = Some(endpoint);
        }
        next.node_records.insert(
            identity_key.to_string(),
            NodeRecord {
                identity_key: identity_key.to_string(),
                role,
                hostname: hostname.clone(),
                mac: mac.to_string(),
                address: source,
                rendered_config: config.clone(),
                first_seen_at: Utc::now(),
            },
        );
        guard.commit(next, Some(bundle))?;

        info!(
            identity = %identity_key,
            %role,
            %hostname,
            address = %source,
            install_disk = %request.install_disk,
            outcome = "success",
            "Assigned role to new machine"
        );
        Ok(IssuedConfig { role, hostname, config, created: true })
    }
}

//! Talos API client.
//!
//! Speaks the machine and cluster gRPC services over mutual TLS using the
//! admin credentials from the bundle's talosconfig.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use futures::StreamExt;
use ignition_abstraction::{
    ClusterClient, ClusterConnector, ClusterError, ClusterNodes, ConfigBundle, HealthEvent, HealthStream,
};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::{Code, Status};
use tracing::{debug, info};

use crate::generator::{TalosConfig, TalosContext};
use crate::talos_api::cluster::cluster_service_client::ClusterServiceClient;
use crate::talos_api::cluster::{ClusterInfo, HealthCheckRequest};
use crate::talos_api::common;
use crate::talos_api::machine::BootstrapRequest;
use crate::talos_api::machine::machine_service_client::MachineServiceClient;

/// Port of the Talos API on every node.
pub const DEFAULT_API_PORT: u16 = 50000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the kubeconfig inside the archive the Kubeconfig call streams.
const KUBECONFIG_ENTRY: &str = "kubeconfig";

/// Connects [`TalosClusterClient`]s using bundle credentials.
#[derive(Debug, Clone)]
pub struct TalosConnector {
    api_port: u16,
}

impl Default for TalosConnector {
    fn default() -> Self {
        Self { api_port: DEFAULT_API_PORT }
    }
}

impl TalosConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }
}

/// Reads the current context out of a talosconfig document.
pub fn talos_context(bundle: &ConfigBundle) -> Result<TalosContext, ClusterError> {
    let raw = bundle
        .get(ConfigBundle::TALOSCONFIG)
        .ok_or_else(|| ClusterError::Credentials("bundle has no talosconfig".to_string()))?;
    let config: TalosConfig =
        serde_yaml::from_slice(raw).map_err(|e| ClusterError::Credentials(format!("invalid talosconfig: {e}")))?;
    config
        .current()
        .cloned()
        .ok_or_else(|| ClusterError::Credentials(format!("talosconfig has no context '{}'", config.context)))
}

fn decode_pem(field: &str, value: &str) -> Result<Vec<u8>, ClusterError> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| ClusterError::Credentials(format!("talosconfig {field} is not base64: {e}")))
}

#[async_trait]
impl ClusterConnector for TalosConnector {
    async fn connect(
        &self,
        bundle: &ConfigBundle,
        endpoint: IpAddr,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        let context = talos_context(bundle)?;
        let ca = decode_pem("ca", &context.ca)?;
        let crt = decode_pem("crt", &context.crt)?;
        let key = decode_pem("key", &context.key)?;

        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca))
            .identity(Identity::from_pem(crt, key))
            .domain_name(endpoint.to_string());

        let uri = format!("https://{}", SocketAddr::new(endpoint, self.api_port));
        debug!(%uri, "Connecting to Talos API");
        let channel = Channel::from_shared(uri.clone())
            .map_err(|e| ClusterError::Connection(e.to_string()))?
            .tls_config(tls)
            .map_err(|e| ClusterError::Credentials(e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await
            .map_err(|e| ClusterError::Connection(format!("{uri}: {e}")))?;

        info!(%uri, outcome = "success", "Connected to Talos API");
        Ok(Arc::new(TalosClusterClient::new(channel)))
    }
}

/// [`ClusterClient`] over a Talos API channel.
#[derive(Debug, Clone)]
pub struct TalosClusterClient {
    machine: MachineServiceClient<Channel>,
    cluster: ClusterServiceClient<Channel>,
}

impl TalosClusterClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            machine: MachineServiceClient::new(channel.clone()),
            cluster: ClusterServiceClient::new(channel),
        }
    }
}

fn status_error(status: Status) -> ClusterError {
    match status.code() {
        Code::Cancelled => ClusterError::Cancelled,
        Code::Unavailable => ClusterError::Connection(status.message().to_string()),
        Code::Unauthenticated | Code::PermissionDenied => {
            ClusterError::Credentials(status.message().to_string())
        }
        code => ClusterError::Rpc(format!("{code:?}: {}", status.message())),
    }
}

fn node_name(metadata: Option<&common::Metadata>) -> Option<String> {
    metadata.map(|m| m.hostname.clone()).filter(|h| !h.is_empty())
}

/// Maps one progress message. A non-empty `metadata.error` is a failed check.
fn health_event(progress: crate::talos_api::cluster::HealthCheckProgress) -> HealthEvent {
    let node = node_name(progress.metadata.as_ref());
    match progress.metadata.map(|m| m.error).filter(|e| !e.is_empty()) {
        Some(error) => HealthEvent::Failure { node, message: error },
        None => HealthEvent::Progress { node, message: progress.message },
    }
}

/// Extracts the kubeconfig from the Kubeconfig call's payload.
///
/// The payload is a gzip'd tar holding a `kubeconfig` entry; anything without
/// the gzip magic is taken to be the kubeconfig itself.
pub fn unpack_kubeconfig(payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
    if !payload.starts_with(&[0x1f, 0x8b]) {
        return Ok(payload.to_vec());
    }
    let mut archive = tar::Archive::new(GzDecoder::new(payload));
    let entries = archive.entries().map_err(|e| ClusterError::InvalidResponse(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ClusterError::InvalidResponse(e.to_string()))?;
        let is_kubeconfig = entry
            .path()
            .map(|p| p.file_name().is_some_and(|n| n == KUBECONFIG_ENTRY))
            .unwrap_or(false);
        if is_kubeconfig {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).map_err(|e| ClusterError::InvalidResponse(e.to_string()))?;
            return Ok(contents);
        }
    }
    Err(ClusterError::InvalidResponse("archive has no kubeconfig entry".to_string()))
}

#[async_trait]
impl ClusterClient for TalosClusterClient {
    async fn bootstrap(&self) -> Result<(), ClusterError> {
        let response = self
            .machine
            .clone()
            .bootstrap(BootstrapRequest { recover_etcd: false, recover_skip_hash_check: false })
            .await
            .map_err(status_error)?
            .into_inner();
        if let Some(error) =
            response.messages.iter().filter_map(|m| m.metadata.as_ref()).find(|m| !m.error.is_empty())
        {
            return Err(ClusterError::Rpc(format!("{}: {}", error.hostname, error.error)));
        }
        Ok(())
    }

    async fn health_check(
        &self,
        nodes: &ClusterNodes,
        wait_timeout: Duration,
    ) -> Result<HealthStream, ClusterError> {
        let request = HealthCheckRequest {
            wait_timeout: Some(common::Duration {
                seconds: i64::try_from(wait_timeout.as_secs()).unwrap_or(i64::MAX),
                nanos: 0,
            }),
            cluster_info: Some(ClusterInfo {
                control_plane_nodes: nodes.control_planes.clone(),
                worker_nodes: nodes.workers.clone(),
                force_endpoint: String::new(),
            }),
        };
        let stream = self.cluster.clone().health_check(request).await.map_err(status_error)?.into_inner();
        Ok(stream.map(|item| item.map(health_event).map_err(status_error)).boxed())
    }

    async fn kubeconfig(&self) -> Result<Vec<u8>, ClusterError> {
        let mut stream = self.machine.clone().kubeconfig(common::Empty {}).await.map_err(status_error)?.into_inner();
        let mut payload = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(status_error)?;
            if let Some(error) = chunk.metadata.as_ref().map(|m| &m.error).filter(|e| !e.is_empty()) {
                return Err(ClusterError::Rpc(error.clone()));
            }
            payload.extend_from_slice(&chunk.bytes);
        }
        unpack_kubeconfig(&payload)
    }
}

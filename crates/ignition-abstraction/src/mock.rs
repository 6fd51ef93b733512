//! In-memory collaborator implementations for tests and dry runs.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tracing::debug;

use crate::bundle::ConfigBundle;
use crate::cluster::{
    ClusterClient, ClusterConnector, ClusterError, ClusterNodes, HealthEvent, HealthStream,
};
use crate::generator::{ConfigGenerator, GenerationError, RenderRequest};
use crate::image::{ImageError, ImageFactory, Schematic};
use crate::params::ClusterParams;
use crate::secrets::{SecretData, SecretError, SecretSink};

/// A deterministic [`ConfigGenerator`] that renders small YAML documents.
///
/// Failures can be injected with [`MockConfigGenerator::fail_next`]; each
/// injected failure is consumed by the next `create_bundle` or `render` call.
#[derive(Debug, Default)]
pub struct MockConfigGenerator {
    bundles_created: AtomicUsize,
    renders: AtomicUsize,
    failures_remaining: AtomicUsize,
}

impl MockConfigGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` generator calls fail.
    pub fn fail_next(&self, times: usize) {
        self.failures_remaining.store(times, Ordering::SeqCst);
    }

    pub fn bundles_created(&self) -> usize {
        self.bundles_created.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ConfigGenerator for MockConfigGenerator {
    async fn create_bundle(
        &self,
        params: &ClusterParams,
        control_plane_addr: IpAddr,
    ) -> Result<ConfigBundle, GenerationError> {
        if self.take_failure() {
            return Err(GenerationError::Credentials("injected failure".to_string()));
        }
        self.bundles_created.fetch_add(1, Ordering::SeqCst);
        debug!(cluster = %params.cluster_name, %control_plane_addr, "MockConfigGenerator creating bundle");

        let mut bundle = ConfigBundle::new();
        for name in ConfigBundle::REQUIRED {
            bundle.insert(
                name,
                format!(
                    "# {name}\ncluster: {}\nendpoint: https://{control_plane_addr}:6443\n",
                    params.cluster_name
                ),
            );
        }
        Ok(bundle)
    }

    async fn render(
        &self,
        bundle: &ConfigBundle,
        request: &RenderRequest,
    ) -> Result<Vec<u8>, GenerationError> {
        if self.take_failure() {
            return Err(GenerationError::Render("injected failure".to_string()));
        }
        let template = bundle
            .get(request.role.document())
            .ok_or_else(|| GenerationError::MissingDocument(request.role.document().to_string()))?;
        self.renders.fetch_add(1, Ordering::SeqCst);

        let mut rendered = template.to_vec();
        rendered.extend_from_slice(
            format!("hostname: {}\ninstallDisk: {}\n", request.hostname, request.install_disk)
                .as_bytes(),
        );
        Ok(rendered)
    }
}

/// A scripted [`ClusterClient`].
#[derive(Debug)]
pub struct MockClusterClient {
    bootstrap_result: Result<(), ClusterError>,
    events: Vec<Result<HealthEvent, ClusterError>>,
    hang: bool,
    kubeconfig: Vec<u8>,
    bootstrap_calls: AtomicUsize,
    health_calls: AtomicUsize,
}

impl Default for MockClusterClient {
    fn default() -> Self {
        Self {
            bootstrap_result: Ok(()),
            events: vec![
                Ok(HealthEvent::Progress {
                    node: Some("controlplane-0".to_string()),
                    message: "waiting for etcd to be healthy: OK".to_string(),
                }),
                Ok(HealthEvent::Healthy),
            ],
            hang: false,
            kubeconfig: b"apiVersion: v1\nkind: Config\n".to_vec(),
            bootstrap_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
        }
    }
}

impl MockClusterClient {
    /// A client whose bootstrap succeeds and whose health check reports healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bootstrap_error(mut self, error: ClusterError) -> Self {
        self.bootstrap_result = Err(error);
        self
    }

    /// Replaces the scripted health stream.
    #[must_use]
    pub fn with_events(mut self, events: Vec<Result<HealthEvent, ClusterError>>) -> Self {
        self.events = events;
        self
    }

    /// Keeps the health stream open after the scripted events.
    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    #[must_use]
    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<Vec<u8>>) -> Self {
        self.kubeconfig = kubeconfig.into();
        self
    }

    pub fn bootstrap_calls(&self) -> usize {
        self.bootstrap_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn bootstrap(&self) -> Result<(), ClusterError> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        self.bootstrap_result.clone()
    }

    async fn health_check(
        &self,
        nodes: &ClusterNodes,
        wait_timeout: Duration,
    ) -> Result<HealthStream, ClusterError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            control_planes = nodes.control_planes.len(),
            workers = nodes.workers.len(),
            wait_timeout_secs = wait_timeout.as_secs(),
            "MockClusterClient health check"
        );

        let events = stream::iter(self.events.clone());
        if self.hang {
            Ok(events.chain(stream::pending()).boxed())
        } else {
            Ok(events.boxed())
        }
    }

    async fn kubeconfig(&self) -> Result<Vec<u8>, ClusterError> {
        Ok(self.kubeconfig.clone())
    }
}

/// Hands out the same [`MockClusterClient`] for every endpoint.
#[derive(Debug, Default)]
pub struct MockConnector {
    client: Arc<MockClusterClient>,
    endpoints: Mutex<Vec<IpAddr>>,
}

impl MockConnector {
    pub fn new(client: Arc<MockClusterClient>) -> Self {
        Self { client, endpoints: Mutex::new(Vec::new()) }
    }

    /// Endpoints passed to `connect`, in call order.
    pub fn endpoints(&self) -> Vec<IpAddr> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ClusterConnector for MockConnector {
    async fn connect(
        &self,
        bundle: &ConfigBundle,
        endpoint: IpAddr,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        if bundle.get(ConfigBundle::TALOSCONFIG).is_none() {
            return Err(ClusterError::Credentials("bundle has no talosconfig".to_string()));
        }
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner).push(endpoint);
        Ok(self.client.clone() as Arc<dyn ClusterClient>)
    }
}

/// A [`SecretSink`] that keeps secrets in memory.
#[derive(Debug, Default)]
pub struct MemorySecretSink {
    secrets: Mutex<BTreeMap<(String, String), SecretData>>,
}

impl MemorySecretSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl SecretSink for MemorySecretSink {
    async fn put(&self, namespace: &str, name: &str, data: &SecretData) -> Result<(), SecretError> {
        let mut secrets = self.secrets.lock().unwrap_or_else(PoisonError::into_inner);
        secrets
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

/// An [`ImageFactory`] that records schematics and writes placeholder images.
#[derive(Debug, Default)]
pub struct MockImageFactory {
    schematics: Mutex<Vec<Schematic>>,
    fail: bool,
}

impl MockImageFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that rejects every schematic.
    #[must_use]
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn schematics(&self) -> Vec<Schematic> {
        self.schematics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ImageFactory for MockImageFactory {
    async fn create_schematic(&self, schematic: &Schematic) -> Result<String, ImageError> {
        if self.fail {
            return Err(ImageError::Schematic("injected failure".to_string()));
        }
        let mut schematics = self.schematics.lock().unwrap_or_else(PoisonError::into_inner);
        schematics.push(schematic.clone());
        Ok(format!("schematic-{}", schematics.len()))
    }

    fn image_url(&self, schematic_id: &str, version: &str, architecture: &str) -> String {
        format!("mock://image/{schematic_id}/{version}/metal-{architecture}.iso")
    }

    async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, ImageError> {
        let name = url.rsplit('/').next().unwrap_or("image.iso");
        let path = dir.join(name);
        tokio::fs::create_dir_all(dir).await.map_err(|e| ImageError::Io(e.to_string()))?;
        tokio::fs::write(&path, url.as_bytes()).await.map_err(|e| ImageError::Io(e.to_string()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::NodeRole;
    use std::net::Ipv4Addr;

    fn cp_request() -> RenderRequest {
        RenderRequest {
            role: NodeRole::ControlPlane,
            hostname: "controlplane-0".to_string(),
            install_disk: "/dev/sda".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_generator_renders_from_bundle() {
        let generator = MockConfigGenerator::new();
        let bundle = generator
            .create_bundle(&ClusterParams::default(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
            .await
            .unwrap();
        let rendered = generator.render(&bundle, &cp_request()).await.unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("endpoint: https://10.0.0.2:6443"));
        assert!(text.contains("hostname: controlplane-0"));
        assert_eq!(generator.renders(), 1);
    }

    #[tokio::test]
    async fn test_mock_generator_failure_is_consumed() {
        let generator = MockConfigGenerator::new();
        let bundle = generator
            .create_bundle(&ClusterParams::default(), IpAddr::V4(Ipv4Addr::LOCALHOST))
            .await
            .unwrap();
        generator.fail_next(1);
        assert!(generator.render(&bundle, &cp_request()).await.is_err());
        assert!(generator.render(&bundle, &cp_request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_sink_merges_keys() {
        let sink = MemorySecretSink::new();
        let mut first = SecretData::new();
        first.insert("a".to_string(), "1".to_string());
        let mut second = SecretData::new();
        second.insert("b".to_string(), "2".to_string());
        sink.put("ns", "creds", &first).await.unwrap();
        sink.put("ns", "creds", &second).await.unwrap();
        let stored = sink.get("ns", "creds").unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_image_factory_writes_placeholder() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let factory = MockImageFactory::new();
        let id = factory
            .create_schematic(&Schematic { kernel_args: vec!["talos.config=x".to_string()], overlay: None })
            .await
            .unwrap();
        let url = factory.image_url(&id, "v1.11.1", "amd64");
        let path = factory.download(&url, temp_dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "metal-amd64.iso");
        assert_eq!(factory.schematics().len(), 1);
        assert!(MockImageFactory::failing().create_schematic(&Schematic::default()).await.is_err());
    }
}

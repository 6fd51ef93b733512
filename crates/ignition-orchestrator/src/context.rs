//! Shared resources for the bootstrap phases.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ignition_abstraction::{
    BootImage, ClusterConnector, ClusterParams, ConfigGenerator, ImageFactory, SecretSink,
};
use ignition_core::config::{Config, FieldDescriptor};
use ignition_core::issuance::{IssuanceServer, MachineConfigService, issuance_server};
use ignition_core::rendezvous::{OAuthToken, Rendezvous};
use ignition_core::state::StateStore;
use tracing::info;

use crate::error::{OrchestratorError, Result};

/// Source of answers for the cluster parameter form.
#[async_trait]
pub trait FormInput: Send + Sync {
    /// Returns the operator's answers for `fields`, prefilled from `current`.
    async fn fill(
        &self,
        fields: &'static [FieldDescriptor],
        current: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>>;
}

/// Accepts the prefilled values and field defaults without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptDefaults;

#[async_trait]
impl FormInput for AcceptDefaults {
    async fn fill(
        &self,
        fields: &'static [FieldDescriptor],
        mut current: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        for field in fields {
            if current.get(field.key).is_none_or(|v| v.trim().is_empty())
                && let Some(default) = field.default_value()
            {
                current.insert(field.key.to_string(), default);
            }
        }
        Ok(current)
    }
}

/// External systems the phases talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ConfigGenerator>,
    pub connector: Arc<dyn ClusterConnector>,
    pub secrets: Arc<dyn SecretSink>,
    pub images: Arc<dyn ImageFactory>,
}

/// Everything a bootstrap run shares between its phases.
pub struct BootstrapContext {
    config: Config,
    store: Arc<StateStore>,
    collaborators: Collaborators,
    form: Arc<dyn FormInput>,
    rendezvous: Arc<Rendezvous>,
    issuance: tokio::sync::Mutex<Option<IssuanceServer>>,
    tokens: Mutex<BTreeMap<String, OAuthToken>>,
    boot_image: Mutex<Option<BootImage>>,
    kubeconfig: Mutex<Option<PathBuf>>,
}

impl std::fmt::Debug for BootstrapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapContext")
            .field("state_dir", &self.config.state_dir)
            .field("providers", &self.config.providers.len())
            .finish_non_exhaustive()
    }
}

impl BootstrapContext {
    pub fn new(
        config: Config,
        store: Arc<StateStore>,
        collaborators: Collaborators,
        form: Arc<dyn FormInput>,
    ) -> Self {
        Self {
            config,
            store,
            collaborators,
            form,
            rendezvous: Arc::new(Rendezvous::new()),
            issuance: tokio::sync::Mutex::new(None),
            tokens: Mutex::new(BTreeMap::new()),
            boot_image: Mutex::new(None),
            kubeconfig: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn form(&self) -> &dyn FormInput {
        self.form.as_ref()
    }

    pub fn rendezvous(&self) -> &Arc<Rendezvous> {
        &self.rendezvous
    }

    /// Whether cluster parameters came from the configuration file.
    pub fn params_from_file(&self) -> bool {
        self.config.cluster.is_some()
    }

    /// The collected cluster parameters.
    pub async fn params(&self) -> Result<ClusterParams> {
        self.store.snapshot().await.bootstrap_config.ok_or(OrchestratorError::MissingParams)
    }

    /// Starts the issuance server over the current state unless it is
    /// already running, and returns its address.
    pub async fn ensure_issuance(&self) -> Result<SocketAddr> {
        let mut slot = self.issuance.lock().await;
        if let Some(addr) = slot.as_ref().filter(|s| s.is_running()).and_then(IssuanceServer::local_addr) {
            return Ok(addr);
        }

        let params = self.params().await?;
        let service = MachineConfigService::new(Arc::clone(&self.store), Arc::clone(&self.collaborators.generator))
            .with_kubernetes_port(self.config.bootstrap.kubernetes_port);
        let mut server = issuance_server(self.config.issuance_bind(&params), Arc::new(service));
        let addr = server
            .start()
            .await
            .map_err(|source| OrchestratorError::Listener { service: "issuance", source })?;
        info!(%addr, base_url = %params.issuance_base_url(), "Machine config issuance is serving");
        *slot = Some(server);
        Ok(addr)
    }

    pub async fn issuance_addr(&self) -> Option<SocketAddr> {
        self.issuance.lock().await.as_ref().and_then(IssuanceServer::local_addr)
    }

    /// Stops long-running listeners.
    pub async fn shutdown(&self) {
        if let Some(mut server) = self.issuance.lock().await.take() {
            server.stop().await;
        }
    }

    pub fn record_token(&self, provider: &str, token: OAuthToken) {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).insert(provider.to_string(), token);
    }

    /// Tokens obtained so far, by provider name.
    pub fn tokens(&self) -> BTreeMap<String, OAuthToken> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_boot_image(&self, image: BootImage) {
        *self.boot_image.lock().unwrap_or_else(PoisonError::into_inner) = Some(image);
    }

    pub fn boot_image(&self) -> Option<BootImage> {
        self.boot_image.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_kubeconfig(&self, path: PathBuf) {
        *self.kubeconfig.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
    }

    pub fn kubeconfig(&self) -> Option<PathBuf> {
        self.kubeconfig.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

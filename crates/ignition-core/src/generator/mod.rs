//! Reference [`ConfigGenerator`] producing Talos machine configuration.
//!
//! [`TemplateConfigGenerator::create_bundle`] generates the cluster PKI and
//! writes one template per machine type plus a talosconfig.
//! [`TemplateConfigGenerator::render`] patches a template with the node's
//! hostname and install disk.

pub mod machine;
pub mod pki;

use std::net::IpAddr;

use async_trait::async_trait;
use ignition_abstraction::{ClusterParams, ConfigBundle, ConfigGenerator, GenerationError, RenderRequest};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

pub use machine::{MachineConfig, MachineType, TalosConfig, TalosContext, machine_config};
pub use pki::{ClusterSecrets, PemPair};

use crate::issuance::DEFAULT_KUBERNETES_PORT;

/// Generates Talos `v1alpha1` documents from templates.
#[derive(Debug, Clone)]
pub struct TemplateConfigGenerator {
    kubernetes_port: u16,
}

impl Default for TemplateConfigGenerator {
    fn default() -> Self {
        Self { kubernetes_port: DEFAULT_KUBERNETES_PORT }
    }
}

impl TemplateConfigGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_kubernetes_port(mut self, port: u16) -> Self {
        self.kubernetes_port = port;
        self
    }
}

fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String, GenerationError> {
    serde_yaml::to_string(value).map_err(|e| GenerationError::Render(e.to_string()))
}

/// Sets `path` in a YAML mapping, creating intermediate mappings.
fn set_path(root: &mut Value, path: &[&str], value: Value) -> Result<(), GenerationError> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };
    let mut node = root;
    for key in parents {
        let Value::Mapping(map) = node else {
            return Err(GenerationError::Render(format!("'{key}' is not under a mapping")));
        };
        node = map
            .entry(Value::String((*key).to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    match node {
        Value::Mapping(map) => {
            map.insert(Value::String((*last).to_string()), value);
            Ok(())
        }
        _ => Err(GenerationError::Render(format!("'{last}' is not under a mapping"))),
    }
}

#[async_trait]
impl ConfigGenerator for TemplateConfigGenerator {
    async fn create_bundle(
        &self,
        params: &ClusterParams,
        control_plane_addr: IpAddr,
    ) -> Result<ConfigBundle, GenerationError> {
        if params.cluster_name.trim().is_empty() {
            return Err(GenerationError::InvalidParams("cluster name is empty".to_string()));
        }
        if params.install_disk.trim().is_empty() {
            return Err(GenerationError::InvalidParams("install disk is empty".to_string()));
        }

        let secrets = ClusterSecrets::generate(&params.cluster_name)?;
        let document = |machine_type| {
            to_yaml(&machine_config(machine_type, params, &secrets, control_plane_addr, self.kubernetes_port))
        };

        let bundle = ConfigBundle::new()
            .with_document(ConfigBundle::CONTROL_PLANE, document(MachineType::ControlPlane)?)
            .with_document(ConfigBundle::WORKER, document(MachineType::Worker)?)
            .with_document(ConfigBundle::INIT, document(MachineType::Init)?)
            .with_document(
                ConfigBundle::TALOSCONFIG,
                to_yaml(&TalosConfig::new(&params.cluster_name, control_plane_addr, &secrets))?,
            );
        info!(cluster = %params.cluster_name, %control_plane_addr, "Generated cluster configuration bundle");
        Ok(bundle)
    }

    async fn render(
        &self,
        bundle: &ConfigBundle,
        request: &RenderRequest,
    ) -> Result<Vec<u8>, GenerationError> {
        let name = request.role.document();
        let template = bundle.get(name).ok_or_else(|| GenerationError::MissingDocument(name.to_string()))?;
        let mut document: Value =
            serde_yaml::from_slice(template).map_err(|e| GenerationError::Render(format!("{name}: {e}")))?;

        set_path(&mut document, &["machine", "network", "hostname"], Value::String(request.hostname.clone()))?;
        set_path(&mut document, &["machine", "install", "disk"], Value::String(request.install_disk.clone()))?;

        debug!(role = %request.role, hostname = %request.hostname, disk = %request.install_disk, "Rendered machine config");
        Ok(to_yaml(&document)?.into_bytes())
    }
}

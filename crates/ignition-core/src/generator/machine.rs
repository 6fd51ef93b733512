//! Talos `v1alpha1` machine configuration and talosconfig documents.
//!
//! Only the fields this generator sets are modelled. Certificates and keys are
//! base64-encoded PEM, as Talos expects.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ignition_abstraction::ClusterParams;
use serde::{Deserialize, Serialize};

use super::pki::{ClusterSecrets, PemPair};

/// Which flavour of machine document to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineType {
    Init,
    ControlPlane,
    Worker,
}

impl MachineType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ControlPlane => "controlplane",
            Self::Worker => "worker",
        }
    }

    fn is_control_plane(self) -> bool {
        !matches!(self, Self::Worker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertAndKey {
    pub crt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl CertAndKey {
    fn full(pair: &PemPair) -> Self {
        Self { crt: pair.crt_b64(), key: Some(pair.key_b64()) }
    }

    fn cert_only(pair: &PemPair) -> Self {
        Self { crt: pair.crt_b64(), key: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    pub version: String,
    pub debug: bool,
    pub persist: bool,
    pub machine: Machine,
    pub cluster: Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    #[serde(rename = "type")]
    pub machine_type: String,
    pub token: String,
    pub ca: CertAndKey,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,
    pub kubelet: Image,
    #[serde(default)]
    pub network: Network,
    pub install: Install,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Install {
    pub disk: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_kernel_args: Vec<String>,
    pub wipe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub secret: String,
    pub control_plane: ControlPlane,
    pub cluster_name: String,
    pub network: ClusterNetwork,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secretbox_encryption_secret: Option<String>,
    pub ca: CertAndKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator_ca: Option<CertAndKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_manager: Option<Image>,
    pub proxy: Image,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd: Option<Etcd>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlane {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    pub dns_domain: String,
    pub pod_subnets: Vec<String>,
    pub service_subnets: Vec<String>,
}

impl Default for ClusterNetwork {
    fn default() -> Self {
        Self {
            dns_domain: "cluster.local".to_string(),
            pod_subnets: vec!["10.244.0.0/16".to_string()],
            service_subnets: vec!["10.96.0.0/12".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Etcd {
    pub ca: CertAndKey,
}

/// Builds the machine document of `machine_type` for a cluster.
pub fn machine_config(
    machine_type: MachineType,
    params: &ClusterParams,
    secrets: &ClusterSecrets,
    control_plane: IpAddr,
    kubernetes_port: u16,
) -> MachineConfig {
    let control_plane_only = machine_type.is_control_plane();
    let k8s_image = |component: &str| Image {
        image: format!("registry.k8s.io/{component}:v{}", params.kubernetes_version.trim_start_matches('v')),
    };
    let sans = vec![control_plane.to_string()];
    let endpoint = format!("https://{}", std::net::SocketAddr::new(control_plane, kubernetes_port));

    MachineConfig {
        version: "v1alpha1".to_string(),
        debug: false,
        persist: true,
        machine: Machine {
            machine_type: machine_type.as_str().to_string(),
            token: secrets.machine_token.clone(),
            ca: if control_plane_only {
                CertAndKey::full(&secrets.os_ca)
            } else {
                CertAndKey::cert_only(&secrets.os_ca)
            },
            cert_sans: if control_plane_only { sans.clone() } else { Vec::new() },
            kubelet: Image {
                image: format!(
                    "ghcr.io/siderolabs/kubelet:v{}",
                    params.kubernetes_version.trim_start_matches('v')
                ),
            },
            network: Network::default(),
            install: Install {
                disk: params.install_disk.clone(),
                image: format!("ghcr.io/siderolabs/installer:{}", params.talos_version),
                extra_kernel_args: params.extra_kernel_args(),
                wipe: false,
            },
        },
        cluster: Cluster {
            id: secrets.cluster_id.clone(),
            secret: secrets.cluster_secret.clone(),
            control_plane: ControlPlane { endpoint },
            cluster_name: params.cluster_name.clone(),
            network: ClusterNetwork::default(),
            token: secrets.bootstrap_token.clone(),
            secretbox_encryption_secret: control_plane_only.then(|| secrets.secretbox_secret.clone()),
            ca: if control_plane_only {
                CertAndKey::full(&secrets.kubernetes_ca)
            } else {
                CertAndKey::cert_only(&secrets.kubernetes_ca)
            },
            aggregator_ca: control_plane_only.then(|| CertAndKey::full(&secrets.aggregator_ca)),
            service_account: control_plane_only.then(|| ServiceAccount {
                key: base64_pem(&secrets.service_account_key),
            }),
            api_server: control_plane_only
                .then(|| ApiServer { image: k8s_image("kube-apiserver").image, cert_sans: sans }),
            controller_manager: control_plane_only.then(|| k8s_image("kube-controller-manager")),
            proxy: k8s_image("kube-proxy"),
            scheduler: control_plane_only.then(|| k8s_image("kube-scheduler")),
            etcd: control_plane_only.then(|| Etcd { ca: CertAndKey::full(&secrets.etcd_ca) }),
        },
    }
}

fn base64_pem(pem: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(pem)
}

/// Client configuration for the Talos API (`talosctl`'s talosconfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalosConfig {
    pub context: String,
    pub contexts: BTreeMap<String, TalosContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalosContext {
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    pub ca: String,
    pub crt: String,
    pub key: String,
}

impl TalosConfig {
    pub fn new(cluster_name: &str, control_plane: IpAddr, secrets: &ClusterSecrets) -> Self {
        let context = TalosContext {
            endpoints: vec![control_plane.to_string()],
            nodes: vec![control_plane.to_string()],
            ca: secrets.os_ca.crt_b64(),
            crt: secrets.admin.crt_b64(),
            key: secrets.admin.key_b64(),
        };
        Self {
            context: cluster_name.to_string(),
            contexts: BTreeMap::from([(cluster_name.to_string(), context)]),
        }
    }

    /// The context named by `context`.
    pub fn current(&self) -> Option<&TalosContext> {
        self.contexts.get(&self.context)
    }
}

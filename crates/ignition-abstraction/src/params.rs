//! Operator-supplied cluster parameters.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use serde::{Deserialize, Serialize};

/// Cluster parameters collected before any machine boots.
///
/// Persisted verbatim as the `bootstrap_config` of the saved state so a
/// resumed run renders new nodes with the same inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,
    #[serde(default = "default_talos_version")]
    pub talos_version: String,
    #[serde(default = "default_talos_architecture")]
    pub talos_architecture: String,
    /// Extra kernel arguments, whitespace separated.
    #[serde(default)]
    pub talos_extra_args: String,
    /// Disk used when no per-machine disk has been selected.
    #[serde(default = "default_install_disk")]
    pub install_disk: String,
    #[serde(default)]
    pub overlay_image: Option<String>,
    #[serde(default)]
    pub overlay_name: Option<String>,
    /// Host name or address nodes use to reach the issuance service.
    #[serde(default = "default_http_hostname")]
    pub http_hostname: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub base_domain: Option<String>,
    #[serde(default)]
    pub load_balancer_ip: Option<String>,
}

pub fn default_cluster_name() -> String {
    "mycluster".to_string()
}

pub fn default_kubernetes_version() -> String {
    "1.34.1".to_string()
}

pub fn default_talos_version() -> String {
    "v1.11.1".to_string()
}

pub fn default_talos_architecture() -> String {
    "amd64".to_string()
}

pub fn default_install_disk() -> String {
    "/dev/sda".to_string()
}

pub fn default_http_hostname() -> String {
    outbound_ip().to_string()
}

pub fn default_http_port() -> u16 {
    8082
}

/// The local address the kernel would route public traffic from.
///
/// Connecting a UDP socket sends no packets; it only selects a route. Falls
/// back to loopback on hosts without a default route.
pub fn outbound_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |addr| addr.ip())
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            kubernetes_version: default_kubernetes_version(),
            talos_version: default_talos_version(),
            talos_architecture: default_talos_architecture(),
            talos_extra_args: String::new(),
            install_disk: default_install_disk(),
            overlay_image: None,
            overlay_name: None,
            http_hostname: default_http_hostname(),
            http_port: default_http_port(),
            base_domain: None,
            load_balancer_ip: None,
        }
    }
}

impl ClusterParams {
    /// Extra kernel arguments split on whitespace.
    pub fn extra_kernel_args(&self) -> Vec<String> {
        self.talos_extra_args.split_whitespace().map(ToString::to_string).collect()
    }

    /// Base URL nodes use to reach the issuance service.
    pub fn issuance_base_url(&self) -> String {
        format!("http://{}:{}", self.http_hostname, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let params: ClusterParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.cluster_name, "mycluster");
        assert_eq!(params.kubernetes_version, "1.34.1");
        assert_eq!(params.talos_version, "v1.11.1");
        assert_eq!(params.talos_architecture, "amd64");
        assert_eq!(params.install_disk, "/dev/sda");
        assert_eq!(params.http_port, 8082);
        assert!(params.overlay_image.is_none());
    }

    #[test]
    fn test_extra_kernel_args_split() {
        let params = ClusterParams {
            talos_extra_args: " console=ttyS0  net.ifnames=0 ".to_string(),
            ..ClusterParams::default()
        };
        assert_eq!(params.extra_kernel_args(), vec!["console=ttyS0", "net.ifnames=0"]);
    }

    #[test]
    fn test_issuance_base_url() {
        let params = ClusterParams {
            http_hostname: "10.0.0.5".to_string(),
            http_port: 9000,
            ..ClusterParams::default()
        };
        assert_eq!(params.issuance_base_url(), "http://10.0.0.5:9000");
    }
}

//! Declarative schema for the cluster parameter form.
//!
//! Front ends render one prompt per [`FieldDescriptor`] and hand the answers
//! to [`params_from_values`]. Nothing here inspects `ClusterParams` at runtime;
//! each key is mapped explicitly.

use std::collections::BTreeMap;

use ignition_abstraction::ClusterParams;
use ignition_abstraction::params::{
    default_cluster_name, default_http_port, default_install_disk, default_kubernetes_version,
    default_talos_architecture, default_talos_version, outbound_ip,
};

use super::error::ConfigError;

/// Supported CPU architectures for boot images.
pub const ARCHITECTURES: &[&str] = &["amd64", "arm64"];

/// How a field's value is entered and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Port,
    Choice(&'static [&'static str]),
}

/// Where a field's default comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    None,
    Static(fn() -> String),
    /// This host's outbound IP address.
    OutboundIp,
}

/// One form field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub help: &'static str,
    pub required: bool,
    pub kind: FieldKind,
    pub default: FieldDefault,
}

fn port_default() -> String {
    default_http_port().to_string()
}

/// Fields of the cluster parameter form, in prompt order.
pub const CLUSTER_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor {
        key: "cluster_name",
        label: "Cluster name",
        help: "Name of the Kubernetes cluster",
        required: true,
        kind: FieldKind::Text,
        default: FieldDefault::Static(default_cluster_name),
    },
    FieldDescriptor {
        key: "kubernetes_version",
        label: "Kubernetes version",
        help: "Version of Kubernetes to install",
        required: true,
        kind: FieldKind::Text,
        default: FieldDefault::Static(default_kubernetes_version),
    },
    FieldDescriptor {
        key: "talos_version",
        label: "Talos version",
        help: "Version of Talos Linux to boot",
        required: true,
        kind: FieldKind::Text,
        default: FieldDefault::Static(default_talos_version),
    },
    FieldDescriptor {
        key: "talos_architecture",
        label: "Architecture",
        help: "CPU architecture of the machines",
        required: true,
        kind: FieldKind::Choice(ARCHITECTURES),
        default: FieldDefault::Static(default_talos_architecture),
    },
    FieldDescriptor {
        key: "talos_extra_args",
        label: "Extra kernel arguments",
        help: "Whitespace separated, e.g. console=ttyS0",
        required: false,
        kind: FieldKind::Text,
        default: FieldDefault::None,
    },
    FieldDescriptor {
        key: "install_disk",
        label: "Install disk",
        help: "Disk Talos installs to unless a machine has its own selection",
        required: true,
        kind: FieldKind::Text,
        default: FieldDefault::Static(default_install_disk),
    },
    FieldDescriptor {
        key: "overlay_image",
        label: "Overlay image",
        help: "Board overlay image, e.g. siderolabs/sbc-raspberrypi",
        required: false,
        kind: FieldKind::Text,
        default: FieldDefault::None,
    },
    FieldDescriptor {
        key: "overlay_name",
        label: "Overlay name",
        help: "Board overlay name, e.g. rpi_generic",
        required: false,
        kind: FieldKind::Text,
        default: FieldDefault::None,
    },
    FieldDescriptor {
        key: "http_hostname",
        label: "Config server host",
        help: "Address machines use to reach this host",
        required: true,
        kind: FieldKind::Text,
        default: FieldDefault::OutboundIp,
    },
    FieldDescriptor {
        key: "http_port",
        label: "Config server port",
        help: "Port the machine config server listens on",
        required: true,
        kind: FieldKind::Port,
        default: FieldDefault::Static(port_default),
    },
    FieldDescriptor {
        key: "base_domain",
        label: "Base domain",
        help: "DNS domain for cluster ingress",
        required: false,
        kind: FieldKind::Text,
        default: FieldDefault::None,
    },
    FieldDescriptor {
        key: "load_balancer_ip",
        label: "Load balancer IP",
        help: "Address reserved for the ingress load balancer",
        required: false,
        kind: FieldKind::Text,
        default: FieldDefault::None,
    },
];

impl FieldDescriptor {
    pub fn default_value(&self) -> Option<String> {
        match self.default {
            FieldDefault::None => None,
            FieldDefault::Static(value) => Some(value()),
            FieldDefault::OutboundIp => Some(outbound_ip().to_string()),
        }
    }

    /// Checks a trimmed, non-empty value against the field kind.
    pub fn validate(&self, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue { field: self.key.to_string(), reason };
        match self.kind {
            FieldKind::Text => Ok(()),
            FieldKind::Port => match value.parse::<u16>() {
                Ok(0) => Err(invalid("port must be between 1 and 65535".to_string())),
                Ok(_) => Ok(()),
                Err(e) => Err(invalid(e.to_string())),
            },
            FieldKind::Choice(choices) if choices.contains(&value) => Ok(()),
            FieldKind::Choice(choices) => {
                Err(invalid(format!("expected one of {}", choices.join(", "))))
            }
        }
    }
}

pub fn field(key: &str) -> Option<&'static FieldDescriptor> {
    CLUSTER_FIELDS.iter().find(|field| field.key == key)
}

/// Builds parameters from form answers, applying defaults and validation.
///
/// Missing or blank answers take the field default. A required field with
/// neither an answer nor a default is an error.
pub fn params_from_values(values: &BTreeMap<String, String>) -> Result<ClusterParams, ConfigError> {
    let mut params = ClusterParams::default();
    for field in CLUSTER_FIELDS {
        let answer = values.get(field.key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let value = match answer.or_else(|| field.default_value()) {
            Some(value) => value,
            None if field.required => return Err(ConfigError::MissingField(field.key.to_string())),
            None => String::new(),
        };
        if !value.is_empty() {
            field.validate(&value)?;
        }
        apply(&mut params, field.key, value)?;
    }
    Ok(params)
}

/// The current values of `params`, keyed like [`CLUSTER_FIELDS`].
pub fn params_to_values(params: &ClusterParams) -> BTreeMap<String, String> {
    let optional = |value: &Option<String>| value.clone().unwrap_or_default();
    [
        ("cluster_name", params.cluster_name.clone()),
        ("kubernetes_version", params.kubernetes_version.clone()),
        ("talos_version", params.talos_version.clone()),
        ("talos_architecture", params.talos_architecture.clone()),
        ("talos_extra_args", params.talos_extra_args.clone()),
        ("install_disk", params.install_disk.clone()),
        ("overlay_image", optional(&params.overlay_image)),
        ("overlay_name", optional(&params.overlay_name)),
        ("http_hostname", params.http_hostname.clone()),
        ("http_port", params.http_port.to_string()),
        ("base_domain", optional(&params.base_domain)),
        ("load_balancer_ip", optional(&params.load_balancer_ip)),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

/// Validates parameters that were loaded from a file rather than the form.
pub fn validate_params(params: &ClusterParams) -> Result<(), ConfigError> {
    params_from_values(&params_to_values(params)).map(|_| ())
}

fn apply(params: &mut ClusterParams, key: &str, value: String) -> Result<(), ConfigError> {
    let optional = |value: String| if value.is_empty() { None } else { Some(value) };
    match key {
        "cluster_name" => params.cluster_name = value,
        "kubernetes_version" => params.kubernetes_version = value,
        "talos_version" => params.talos_version = value,
        "talos_architecture" => params.talos_architecture = value,
        "talos_extra_args" => params.talos_extra_args = value,
        "install_disk" => params.install_disk = value,
        "overlay_image" => params.overlay_image = optional(value),
        "overlay_name" => params.overlay_name = optional(value),
        "http_hostname" => params.http_hostname = value,
        "http_port" => {
            params.http_port = value.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue { field: key.to_string(), reason: e.to_string() }
            })?;
        }
        "base_domain" => params.base_domain = optional(value),
        "load_balancer_ip" => params.load_balancer_ip = optional(value),
        other => return Err(ConfigError::UnknownField(other.to_string())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn test_every_field_maps_to_params() {
        let params = ClusterParams::default();
        let mapped = params_to_values(&params);
        for field in CLUSTER_FIELDS {
            assert!(mapped.contains_key(field.key), "unmapped field {}", field.key);
        }
        assert_eq!(mapped.len(), CLUSTER_FIELDS.len());
    }

    #[test]
    fn test_blank_answers_take_defaults() {
        let params = params_from_values(&values(&[("cluster_name", "  "), ("http_hostname", "10.0.0.9")]))
            .unwrap();
        assert_eq!(params.cluster_name, "mycluster");
        assert_eq!(params.talos_version, "v1.11.1");
        assert_eq!(params.http_port, 8082);
        assert_eq!(params.http_hostname, "10.0.0.9");
        assert!(params.overlay_image.is_none());
    }

    #[test]
    fn test_answers_override_defaults() {
        let params = params_from_values(&values(&[
            ("cluster_name", "lab"),
            ("talos_architecture", "arm64"),
            ("http_port", "9000"),
            ("overlay_image", "siderolabs/sbc-raspberrypi"),
        ]))
        .unwrap();
        assert_eq!(params.cluster_name, "lab");
        assert_eq!(params.talos_architecture, "arm64");
        assert_eq!(params.http_port, 9000);
        assert_eq!(params.overlay_image.as_deref(), Some("siderolabs/sbc-raspberrypi"));
    }

    #[test]
    fn test_invalid_choice_rejected() {
        let err = params_from_values(&values(&[("talos_architecture", "riscv")])).unwrap_err();
        match err {
            ConfigError::InvalidValue { field, reason } => {
                assert_eq!(field, "talos_architecture");
                assert!(reason.contains("amd64"));
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(params_from_values(&values(&[("http_port", "0")])).is_err());
        assert!(params_from_values(&values(&[("http_port", "http")])).is_err());
    }

    #[test]
    fn test_field_lookup() {
        let port = field("http_port").unwrap();
        assert_eq!(port.kind, FieldKind::Port);
        assert_eq!(port.default_value().as_deref(), Some("8082"));
        assert!(field("nope").is_none());
    }
}

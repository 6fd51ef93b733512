//! Persisted cluster state.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ignition_abstraction::{ClusterNodes, ClusterParams, NodeRole};
use serde::{Deserialize, Serialize};

/// Identity and assigned configuration for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable hardware identifier reported by the machine (SMBIOS UUID).
    pub identity_key: String,
    pub role: NodeRole,
    pub hostname: String,
    /// MAC address reported alongside the identity, if any.
    #[serde(default)]
    pub mac: String,
    /// Source address of the first request.
    pub address: IpAddr,
    /// Exact bytes served to this machine. Replayed on every later request.
    #[serde(with = "base64_bytes")]
    pub rendered_config: Vec<u8>,
    pub first_seen_at: DateTime<Utc>,
}

/// Node counts per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub control_planes: usize,
    pub workers: usize,
}

/// The durable root object, written as `bootstrap-state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSaveState {
    /// Set once, when the first control plane is assigned.
    #[serde(default)]
    pub cluster_endpoint: Option<String>,
    #[serde(default)]
    pub bootstrap_config: Option<ClusterParams>,
    /// Records keyed by identity.
    #[serde(default)]
    pub node_records: BTreeMap<String, NodeRecord>,
    /// Install disk chosen per identity.
    #[serde(default)]
    pub machine_disks: BTreeMap<String, String>,
    /// True once the bootstrap call has succeeded.
    #[serde(default)]
    pub bootstrapped: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClusterSaveState {
    pub fn record(&self, identity_key: &str) -> Option<&NodeRecord> {
        self.node_records.get(identity_key)
    }

    pub fn records_with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeRecord> {
        self.node_records.values().filter(move |record| record.role == role)
    }

    pub fn count(&self, role: NodeRole) -> usize {
        self.records_with_role(role).count()
    }

    pub fn counts(&self) -> NodeCounts {
        NodeCounts {
            control_planes: self.count(NodeRole::ControlPlane),
            workers: self.count(NodeRole::Worker),
        }
    }

    pub fn has_control_plane(&self) -> bool {
        self.records_with_role(NodeRole::ControlPlane).next().is_some()
    }

    /// The control plane that was assigned first.
    pub fn first_control_plane(&self) -> Option<&NodeRecord> {
        self.records_with_role(NodeRole::ControlPlane).min_by_key(|record| record.first_seen_at)
    }

    /// Records sorted by the order machines first asked for configuration.
    pub fn records_by_arrival(&self) -> Vec<&NodeRecord> {
        let mut records: Vec<&NodeRecord> = self.node_records.values().collect();
        records.sort_by_key(|record| record.first_seen_at);
        records
    }

    /// Install disk for `identity_key`, falling back to the cluster default.
    pub fn install_disk_for(&self, identity_key: &str, params: &ClusterParams) -> String {
        self.machine_disks
            .get(identity_key)
            .cloned()
            .unwrap_or_else(|| params.install_disk.clone())
    }

    /// Node addresses grouped by role, for health checks.
    pub fn cluster_nodes(&self) -> ClusterNodes {
        let addresses = |role: NodeRole| -> Vec<String> {
            let mut records: Vec<&NodeRecord> = self.records_with_role(role).collect();
            records.sort_by_key(|record| record.first_seen_at);
            records.into_iter().map(|record| record.address.to_string()).collect()
        };
        ClusterNodes {
            control_planes: addresses(NodeRole::ControlPlane),
            workers: addresses(NodeRole::Worker),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

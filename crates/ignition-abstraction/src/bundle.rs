//! Node roles and the generated configuration bundle.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The role a machine is assigned when it first asks for configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Runs the Kubernetes API server and etcd.
    ControlPlane,
    /// Runs workloads only.
    Worker,
}

impl NodeRole {
    /// Prefix used when naming hosts of this role, e.g. `worker-2`.
    pub const fn hostname_prefix(self) -> &'static str {
        match self {
            Self::ControlPlane => "controlplane",
            Self::Worker => "worker",
        }
    }

    /// Name of the bundle document a node of this role is rendered from.
    pub const fn document(self) -> &'static str {
        match self {
            Self::ControlPlane => ConfigBundle::CONTROL_PLANE,
            Self::Worker => ConfigBundle::WORKER,
        }
    }

    /// Builds the hostname for the `ordinal`-th node of this role.
    pub fn hostname(self, ordinal: usize) -> String {
        format!("{}-{}", self.hostname_prefix(), ordinal)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// A set of named, mutually consistent configuration documents for one cluster.
///
/// Documents are opaque bytes. The store writes each one as a standalone file
/// named after its key, so names must be plain file names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBundle {
    documents: BTreeMap<String, Vec<u8>>,
}

impl ConfigBundle {
    /// Template for control plane nodes.
    pub const CONTROL_PLANE: &'static str = "controlplane.yaml";
    /// Template for worker nodes.
    pub const WORKER: &'static str = "worker.yaml";
    /// Template for the initial control plane node.
    pub const INIT: &'static str = "init.yaml";
    /// Client credentials for the machine API.
    pub const TALOSCONFIG: &'static str = "talosconfig";

    /// Every document a complete bundle carries.
    pub const REQUIRED: [&'static str; 4] =
        [Self::CONTROL_PLANE, Self::WORKER, Self::INIT, Self::TALOSCONFIG];

    /// Creates an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a document.
    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.documents.insert(name.into(), contents.into());
    }

    /// Builder-style variant of [`ConfigBundle::insert`].
    #[must_use]
    pub fn with_document(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(name, contents);
        self
    }

    /// Returns the document with the given name.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.documents.get(name).map(Vec::as_slice)
    }

    /// Iterates over `(name, contents)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.documents.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Required documents that are not present.
    pub fn missing(&self) -> Vec<&'static str> {
        Self::REQUIRED.into_iter().filter(|name| !self.documents.contains_key(*name)).collect()
    }

    /// True when every required document is present.
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

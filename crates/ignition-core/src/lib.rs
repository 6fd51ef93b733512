//! Ignition Core - bare-metal cluster bootstrap services.
//!
//! This crate provides everything the phase orchestrator drives:
//! - the persistent cluster state store
//! - the machine config issuance server
//! - the OAuth callback rendezvous
//! - cluster bootstrap and health polling
//! - reference collaborators (Talos config generator, Talos API client,
//!   image factory client, file secret sink)
//! - configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ignition_core::{Config, StateStore, FileSnapshotStore};
//!
//! # fn main() -> ignition_core::Result<()> {
//! let config = Config::load(None)?;
//! let (store, found) = StateStore::open(Arc::new(FileSnapshotStore::new(&config.state_dir)))?;
//! println!("resumed: {found}, nodes: {}", store.counts().control_planes);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod generator;
pub mod image;
pub mod issuance;
pub mod rendezvous;
pub mod secrets;
pub mod server;
pub mod state;
pub mod talos;

/// Generated protobuf code for the Talos API subset.
#[allow(clippy::similar_names)]
#[allow(clippy::doc_markdown)]
#[allow(clippy::derive_partial_eq_without_eq)]
pub mod talos_api {
    pub mod common {
        tonic::include_proto!("common");
    }
    pub mod machine {
        tonic::include_proto!("machine");
    }
    pub mod cluster {
        tonic::include_proto!("cluster");
    }
}

pub use bootstrap::{
    BootstrapError, DEFAULT_HEALTH_TIMEOUT, HealthCheckError, KUBECONFIG_FILE, execute_bootstrap,
    fetch_kubeconfig, poll_health,
};
pub use config::{Config, ConfigError};
pub use error::{IgnitionError, Result};
pub use generator::TemplateConfigGenerator;
pub use image::{FactoryClient, boot_schematic, build_boot_image};
pub use issuance::{IssuanceError, IssuanceServer, MachineConfigService, issuance_server};
pub use rendezvous::{
    CallbackHandler, CallbackServer, OAuthFlow, OAuthProvider, OAuthToken, Rendezvous,
    RendezvousError, callback_server,
};
pub use secrets::FileSecretSink;
pub use state::{
    ClusterSaveState, FileSnapshotStore, NodeCounts, NodeRecord, SnapshotPersistence, StateStore,
    StoreError,
};
pub use talos::{TalosClusterClient, TalosConnector};

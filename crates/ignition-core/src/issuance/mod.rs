//! Machine configuration issuance.
//!
//! Booting machines call `GET /machineconfig?m=<mac>&u=<uuid>`. The first
//! caller is assigned the control plane role, later callers become workers,
//! and repeated calls replay the bytes from the first response.

pub mod error;
pub mod server;
pub mod service;

pub use error::IssuanceError;
pub use server::{IssuanceServer, MACHINE_CONFIG_PATH, MachineConfigHandler, issuance_server};
pub use service::{DEFAULT_KUBERNETES_PORT, IssuedConfig, MachineConfigService};

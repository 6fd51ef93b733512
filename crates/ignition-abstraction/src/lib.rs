//! Collaborator abstractions for Ignition.
//!
//! The bootstrap pipeline depends on a handful of external systems that it
//! never implements itself: something that renders machine configuration,
//! something that talks to the booted cluster, something that stores
//! credentials and the factory that builds boot images. This crate defines
//! the traits and value types at those seams so the core and the orchestrator
//! can be exercised against in-memory mocks.

pub mod bundle;
pub mod cluster;
pub mod generator;
pub mod image;
pub mod mock;
pub mod params;
pub mod secrets;

pub use bundle::{ConfigBundle, NodeRole};
pub use cluster::{
    ClusterClient, ClusterConnector, ClusterError, ClusterNodes, HealthEvent, HealthStream,
};
pub use generator::{ConfigGenerator, GenerationError, RenderRequest};
pub use image::{BootImage, ImageError, ImageFactory, Overlay, Schematic};
pub use params::ClusterParams;
pub use secrets::{SecretData, SecretError, SecretSink};

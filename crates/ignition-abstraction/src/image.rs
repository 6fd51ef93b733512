//! Boot image factory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the image factory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// The factory rejected the schematic.
    #[error("Schematic rejected: {0}")]
    Schematic(String),

    /// The request or download failed in transit.
    #[error("Image factory request failed: {0}")]
    Transport(String),

    /// Writing the image to disk failed.
    #[error("Failed to write image: {0}")]
    Io(String),
}

/// Board overlay baked into the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub image: String,
    pub name: String,
}

/// Customization registered with the factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schematic {
    pub kernel_args: Vec<String>,
    pub overlay: Option<Overlay>,
}

/// Where a boot image came from and where it ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    pub schematic_id: String,
    pub url: String,
    pub path: PathBuf,
}

/// Builds boot images that point machines at the issuance service.
#[async_trait]
pub trait ImageFactory: Send + Sync {
    /// Registers `schematic` and returns its id.
    async fn create_schematic(&self, schematic: &Schematic) -> Result<String, ImageError>;

    /// Download URL of the image for a schematic.
    fn image_url(&self, schematic_id: &str, version: &str, architecture: &str) -> String;

    /// Downloads `url` into `dir`, returning the written file.
    async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, ImageError>;
}

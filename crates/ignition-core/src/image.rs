//! Talos image factory client.
//!
//! Registers a schematic whose kernel arguments point booting machines at the
//! issuance service, then downloads the matching boot image.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use ignition_abstraction::{BootImage, ClusterParams, ImageError, ImageFactory, Overlay, Schematic};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::issuance::MACHINE_CONFIG_PATH;

/// Public image factory.
pub const DEFAULT_FACTORY_URL: &str = "https://factory.talos.dev";

/// HTTP client for a Talos image factory.
#[derive(Debug, Clone)]
pub struct FactoryClient {
    base_url: String,
    client: Client,
}

#[derive(Serialize)]
struct SchematicBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    overlay: Option<&'a Overlay>,
    customization: Customization<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Customization<'a> {
    extra_kernel_args: &'a [String],
}

#[derive(Deserialize)]
struct SchematicResponse {
    id: String,
}

impl FactoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), client: Client::new() }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for FactoryClient {
    fn default() -> Self {
        Self::new(DEFAULT_FACTORY_URL)
    }
}

/// Image file name for an architecture. ARM boards boot raw disk images.
pub fn image_file_name(architecture: &str) -> String {
    let format = if architecture == "arm64" { "raw.xz" } else { "iso" };
    format!("metal-{architecture}.{format}")
}

/// Kernel argument telling Talos where to fetch its machine config.
///
/// `${mac}` and `${uuid}` are expanded by the booting machine.
pub fn config_kernel_arg(params: &ClusterParams) -> String {
    format!("talos.config={}{}?m=${{mac}}&u=${{uuid}}", params.issuance_base_url(), MACHINE_CONFIG_PATH)
}

/// The schematic for `params`: the config URL, extra kernel args and overlay.
pub fn boot_schematic(params: &ClusterParams) -> Schematic {
    let mut kernel_args = vec![config_kernel_arg(params)];
    kernel_args.extend(params.extra_kernel_args());
    let overlay = match (&params.overlay_image, &params.overlay_name) {
        (Some(image), Some(name)) => Some(Overlay { image: image.clone(), name: name.clone() }),
        _ => None,
    };
    Schematic { kernel_args, overlay }
}

/// Registers the schematic for `params` and downloads its image into `dir`.
pub async fn build_boot_image(
    factory: &dyn ImageFactory,
    params: &ClusterParams,
    dir: &Path,
) -> Result<BootImage, ImageError> {
    let schematic = boot_schematic(params);
    info!(kernel_args = ?schematic.kernel_args, "Creating boot image schematic");
    let schematic_id = factory.create_schematic(&schematic).await?;
    info!(schematic_id = %schematic_id, "Created schematic");

    let url = factory.image_url(&schematic_id, &params.talos_version, &params.talos_architecture);
    info!(%url, "Downloading boot image");
    let path = factory.download(&url, dir).await?;
    info!(path = %path.display(), outcome = "success", "Boot image saved");
    Ok(BootImage { schematic_id, url, path })
}

#[async_trait]
impl ImageFactory for FactoryClient {
    async fn create_schematic(&self, schematic: &Schematic) -> Result<String, ImageError> {
        let body = SchematicBody {
            overlay: schematic.overlay.as_ref(),
            customization: Customization { extra_kernel_args: &schematic.kernel_args },
        };
        let yaml = serde_yaml::to_string(&body).map_err(|e| ImageError::Schematic(e.to_string()))?;
        debug!(schematic = %yaml, "Posting schematic");

        let response = self
            .client
            .post(format!("{}/schematics", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/yaml")
            .body(yaml)
            .send()
            .await
            .map_err(|e| ImageError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ImageError::Schematic(format!("HTTP {}: {}", status.as_u16(), text.trim())));
        }
        let parsed: SchematicResponse =
            response.json().await.map_err(|e| ImageError::Schematic(format!("invalid response: {e}")))?;
        Ok(parsed.id)
    }

    fn image_url(&self, schematic_id: &str, version: &str, architecture: &str) -> String {
        format!("{}/image/{}/{}/{}", self.base_url, schematic_id, version, image_file_name(architecture))
    }

    async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, ImageError> {
        let name = url.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or("talos-image");
        let path = dir.join(name);

        let response = self.client.get(url).send().await.map_err(|e| ImageError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Transport(format!("HTTP {} fetching {}", status.as_u16(), url)));
        }

        tokio::fs::create_dir_all(dir).await.map_err(|e| ImageError::Io(e.to_string()))?;
        let partial = dir.join(format!(".{name}.part"));
        let mut file = tokio::fs::File::create(&partial).await.map_err(|e| ImageError::Io(e.to_string()))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ImageError::Transport(e.to_string()))?;
            file.write_all(&chunk).await.map_err(|e| ImageError::Io(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| ImageError::Io(e.to_string()))?;
        drop(file);
        tokio::fs::rename(&partial, &path).await.map_err(|e| ImageError::Io(e.to_string()))?;

        debug!(path = %path.display(), bytes = written, "Download complete");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams {
            http_hostname: "192.168.1.10".to_string(),
            http_port: 8082,
            talos_extra_args: "console=ttyS0".to_string(),
            ..ClusterParams::default()
        }
    }

    #[test]
    fn test_config_kernel_arg() {
        assert_eq!(
            config_kernel_arg(&params()),
            "talos.config=http://192.168.1.10:8082/machineconfig?m=${mac}&u=${uuid}"
        );
    }

    #[test]
    fn test_boot_schematic_includes_extra_args() {
        let schematic = boot_schematic(&params());
        assert_eq!(schematic.kernel_args.len(), 2);
        assert_eq!(schematic.kernel_args[1], "console=ttyS0");
        assert!(schematic.overlay.is_none());
    }

    #[test]
    fn test_overlay_needs_image_and_name() {
        let with_overlay = ClusterParams {
            overlay_image: Some("siderolabs/sbc-raspberrypi".to_string()),
            overlay_name: Some("rpi_generic".to_string()),
            ..params()
        };
        assert_eq!(boot_schematic(&with_overlay).overlay.unwrap().name, "rpi_generic");

        let image_only = ClusterParams { overlay_image: Some("x".to_string()), ..params() };
        assert!(boot_schematic(&image_only).overlay.is_none());
    }

    #[test]
    fn test_image_url_by_architecture() {
        let client = FactoryClient::new("https://factory.example/");
        assert_eq!(
            client.image_url("abc", "v1.11.1", "amd64"),
            "https://factory.example/image/abc/v1.11.1/metal-amd64.iso"
        );
        assert_eq!(
            client.image_url("abc", "v1.11.1", "arm64"),
            "https://factory.example/image/abc/v1.11.1/metal-arm64.raw.xz"
        );
    }
}

//! Registry digest lookups through the engine CLI

use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::orchestration::runtime::RegistryClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Queries remote manifests with `docker buildx imagetools inspect`
pub struct EngineRegistryClient {
    binary: String,
}

#[derive(Debug, Deserialize)]
struct ManifestDescriptor {
    digest: String,
}

impl EngineRegistryClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

fn parse_descriptor(image: &str, json: &str) -> ImageBuilderResult<String> {
    let descriptor: ManifestDescriptor =
        serde_json::from_str(json).map_err(|e| ImageBuilderError::DigestLookup {
            image: image.to_string(),
            reason: format!("unexpected inspect output: {}", e),
        })?;
    Ok(descriptor.digest)
}

#[async_trait]
impl RegistryClient for EngineRegistryClient {
    async fn get_manifest_digest(&self, image: &str) -> ImageBuilderResult<String> {
        debug!("Querying registry digest of {}", image);

        let output = Command::new(&self.binary)
            .args([
                "buildx",
                "imagetools",
                "inspect",
                image,
                "--format",
                "{{json .Manifest}}",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ImageBuilderError::command_failed(format!("{} buildx imagetools", self.binary), e)
            })?;

        if !output.status.success() {
            return Err(ImageBuilderError::DigestLookup {
                image: image.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_descriptor(image, String::from_utf8_lossy(&output.stdout).trim())
    }
}

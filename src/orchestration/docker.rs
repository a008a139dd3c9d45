//! Docker CLI engine
//!
//! Implements [`ImageEngine`] by shelling out to a docker-compatible CLI.
//! Podman accepts the same commands, so the binary is configurable.

use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::orchestration::runtime::{BuildRequest, ImageEngine};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Engine backed by the `docker` (or `podman`) command line
pub struct DockerEngine {
    binary: String,
}

impl DockerEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Execute an engine command and return the output
    async fn exec(&self, args: &[&str]) -> ImageBuilderResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.binary, args);

        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ImageBuilderError::command_failed(format!("{} {:?}", self.binary, args), e))
    }

    /// Execute and fail on a non-zero exit, returning trimmed stdout
    async fn exec_ok(&self, args: &[&str]) -> ImageBuilderResult<String> {
        let output = self.exec(args).await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(ImageBuilderError::command_exec(
                format!("{} {}", self.binary, args.join(" ")),
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }

    async fn inspect(&self, image: &str, format: &str) -> ImageBuilderResult<String> {
        self.exec_ok(&["image", "inspect", "--format", format, image])
            .await
    }
}

/// Pick the repo digest belonging to the image's own repository
fn select_repo_digest(image: &str, digests: Vec<String>) -> Option<String> {
    let repo = image_repo(image);
    digests
        .iter()
        .find(|d| d.split_once('@').is_some_and(|(r, _)| r == repo))
        .or_else(|| digests.first())
        .cloned()
}

/// Repository part of a reference, without tag or digest
fn image_repo(image: &str) -> &str {
    let without_digest = image.split_once('@').map(|(r, _)| r).unwrap_or(image);
    match without_digest.rsplit_once(':') {
        // A colon before the last slash belongs to a registry port
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => without_digest,
    }
}

#[async_trait]
impl ImageEngine for DockerEngine {
    async fn pull(&self, image: &str) -> ImageBuilderResult<()> {
        info!("Pulling image: {}", image);

        let output = self.exec(&["pull", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ImageBuilderError::ImagePull {
                image: image.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn get_digest(&self, image: &str) -> ImageBuilderResult<Option<String>> {
        let json = self
            .inspect(image, "{{json .RepoDigests}}")
            .await
            .map_err(|e| ImageBuilderError::DigestLookup {
                image: image.to_string(),
                reason: e.to_string(),
            })?;

        let digests: Option<Vec<String>> = serde_json::from_str(&json)?;
        Ok(select_repo_digest(image, digests.unwrap_or_default()))
    }

    async fn get_layers(&self, image: &str) -> ImageBuilderResult<Vec<String>> {
        let json = self.inspect(image, "{{json .RootFS.Layers}}").await?;
        let layers: Option<Vec<String>> = serde_json::from_str(&json)?;
        Ok(layers.unwrap_or_default())
    }

    async fn get_created_date(&self, image: &str) -> ImageBuilderResult<DateTime<Utc>> {
        let created = self.inspect(image, "{{.Created}}").await?;

        DateTime::parse_from_rfc3339(&created)
            .map(|date| date.with_timezone(&Utc))
            .map_err(|e| {
                ImageBuilderError::command_exec(
                    format!("{} image inspect {}", self.binary, image),
                    format!("unparseable creation date '{}': {}", created, e),
                )
            })
    }

    async fn build(
        &self,
        request: &BuildRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ImageBuilderResult<String> {
        let args = build_command_args(request);

        debug!("Executing: {} {:?}", self.binary, args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ImageBuilderError::command_failed(format!("{} build", self.binary), e))?;

        let all_output = super::stream_child_output(&mut child, on_output).await?;

        let status = child
            .wait()
            .await
            .map_err(|e| ImageBuilderError::command_failed(format!("{} build", self.binary), e))?;

        let combined = all_output.join("\n");
        if !status.success() {
            return Err(ImageBuilderError::ImageBuild {
                dockerfile: request.dockerfile.display().to_string(),
                output: super::build_error_output(&combined, ""),
            });
        }

        Ok(combined)
    }

    async fn tag(&self, source: &str, target: &str) -> ImageBuilderResult<()> {
        debug!("Tagging {} as {}", source, target);
        self.exec_ok(&["tag", source, target]).await.map(|_| ())
    }

    async fn push(&self, image: &str) -> ImageBuilderResult<()> {
        info!("Pushing image: {}", image);
        self.exec_ok(&["push", image]).await.map(|_| ())
    }

    async fn create_manifest_list(&self, name: &str, images: &[String]) -> ImageBuilderResult<()> {
        let mut args = vec!["manifest", "create", "--amend", name];
        args.extend(images.iter().map(String::as_str));
        self.exec_ok(&args).await.map(|_| ())
    }

    async fn push_manifest_list(&self, name: &str) -> ImageBuilderResult<()> {
        info!("Pushing manifest list: {}", name);
        self.exec_ok(&["manifest", "push", name]).await.map(|_| ())
    }

    fn engine_name(&self) -> &'static str {
        if self.binary.ends_with("podman") {
            "Podman"
        } else {
            "Docker"
        }
    }
}

fn build_command_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "--platform".to_string(),
        request.platform.clone(),
        "-f".to_string(),
        request.dockerfile.display().to_string(),
    ];
    for tag in &request.tags {
        args.push("-t".to_string());
        args.push(tag.clone());
    }
    for (name, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", name, value));
    }
    args.push(request.context.display().to_string());
    args
}

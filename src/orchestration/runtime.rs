//! Collaborator abstractions
//!
//! The build and staleness logic only talks to these traits, so the docker
//! and git CLIs can be swapped for in-memory fakes.

use crate::error::ImageBuilderResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Inputs of one `build` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Dockerfile path on disk
    pub dockerfile: PathBuf,
    /// Build context directory
    pub context: PathBuf,
    /// Fully qualified tags applied to the result
    pub tags: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    /// Target platform (`os/arch[/variant]`)
    pub platform: String,
}

/// Container engine operations
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Pull an image by tag or digest reference
    async fn pull(&self, image: &str) -> ImageBuilderResult<()>;

    /// Registry digest (`repo@sha256:...`) of a local image, if it has one
    async fn get_digest(&self, image: &str) -> ImageBuilderResult<Option<String>>;

    /// Layer digests of a local image, base layers first
    async fn get_layers(&self, image: &str) -> ImageBuilderResult<Vec<String>>;

    /// Creation time of a local image
    async fn get_created_date(&self, image: &str) -> ImageBuilderResult<DateTime<Utc>>;

    /// Build an image, streaming output lines to `on_output`.
    ///
    /// Returns the full build output.
    async fn build(
        &self,
        request: &BuildRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ImageBuilderResult<String>;

    async fn tag(&self, source: &str, target: &str) -> ImageBuilderResult<()>;

    async fn push(&self, image: &str) -> ImageBuilderResult<()>;

    /// Create a manifest list `name` over the given platform images
    async fn create_manifest_list(&self, name: &str, images: &[String]) -> ImageBuilderResult<()>;

    async fn push_manifest_list(&self, name: &str) -> ImageBuilderResult<()>;

    /// Human-readable engine name for display
    fn engine_name(&self) -> &'static str;
}

/// Source control queries
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// SHA of the latest commit touching `path`
    async fn get_commit_sha(&self, path: &Path) -> ImageBuilderResult<String>;
}

/// Remote registry queries
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Digest (`sha256:...`) the registry currently serves for a reference
    async fn get_manifest_digest(&self, image: &str) -> ImageBuilderResult<String>;
}

//! In-memory collaborators for tests
//!
//! Every call is recorded so tests can assert on what the build or staleness
//! logic asked for, not just on its output.

use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::orchestration::runtime::{BuildRequest, ImageEngine, RegistryClient, SourceControl};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct EngineState {
    digests: HashMap<String, String>,
    layers: HashMap<String, Vec<String>>,
    failing_pulls: HashSet<String>,
    dockerfile_bases: HashMap<PathBuf, String>,
    build_output: String,
    builds: usize,
    build_platforms: Vec<String>,
    calls: Vec<String>,
}

/// Engine that tracks images in memory
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

pub fn created_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

fn repo_of(image: &str) -> &str {
    let image = image.split_once('@').map(|(r, _)| r).unwrap_or(image);
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => image,
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image with a repo digest and layers
    pub fn with_image(self, image: &str, digest: &str, layers: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.digests.insert(image.to_string(), digest.to_string());
            state
                .layers
                .insert(image.to_string(), layers.iter().map(|l| l.to_string()).collect());
        }
        self
    }

    /// Built images of this Dockerfile carry the base's layers first
    pub fn with_dockerfile_base(self, dockerfile: impl Into<PathBuf>, base: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .dockerfile_bases
            .insert(dockerfile.into(), base.to_string());
        self
    }

    pub fn with_failing_pull(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_pulls
            .insert(image.to_string());
        self
    }

    pub fn with_build_output(self, output: &str) -> Self {
        self.state.lock().unwrap().build_output = output.to_string();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded calls starting with `prefix` (e.g. "push ")
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn builds(&self) -> usize {
        self.state.lock().unwrap().builds
    }

    /// Target platform of every build, in order
    pub fn build_platforms(&self) -> Vec<String> {
        self.state.lock().unwrap().build_platforms.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ImageEngine for FakeEngine {
    async fn pull(&self, image: &str) -> ImageBuilderResult<()> {
        self.record(format!("pull {}", image));
        let mut state = self.state.lock().unwrap();
        if state.failing_pulls.contains(image) {
            return Err(ImageBuilderError::ImagePull {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            });
        }
        if image.contains('@') && !state.digests.contains_key(image) {
            // Pulling by digest makes an image known under that digest
            let layers = state
                .digests
                .iter()
                .find(|(_, digest)| digest.as_str() == image)
                .and_then(|(known, _)| state.layers.get(known))
                .cloned()
                .unwrap_or_default();
            state.digests.insert(image.to_string(), image.to_string());
            state.layers.insert(image.to_string(), layers);
        }
        Ok(())
    }

    async fn get_digest(&self, image: &str) -> ImageBuilderResult<Option<String>> {
        Ok(self.state.lock().unwrap().digests.get(image).cloned())
    }

    async fn get_layers(&self, image: &str) -> ImageBuilderResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .layers
            .get(image)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_created_date(&self, _image: &str) -> ImageBuilderResult<DateTime<Utc>> {
        Ok(created_date())
    }

    async fn build(
        &self,
        request: &BuildRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ImageBuilderResult<String> {
        self.record(format!("build {}", request.dockerfile.display()));
        let mut state = self.state.lock().unwrap();
        state.builds += 1;
        state.build_platforms.push(request.platform.clone());
        let digest = format!("sha256:built{}", state.builds);
        let mut layers = state
            .dockerfile_bases
            .get(&request.dockerfile)
            .and_then(|base| state.layers.get(base))
            .cloned()
            .unwrap_or_default();
        layers.push(format!("layer-built{}", state.builds));
        for tag in &request.tags {
            state
                .digests
                .insert(tag.clone(), format!("{}@{}", repo_of(tag), digest));
            state.layers.insert(tag.clone(), layers.clone());
        }
        let output = state.build_output.clone();
        for line in output.lines() {
            on_output(line.to_string());
        }
        Ok(output)
    }

    async fn tag(&self, source: &str, target: &str) -> ImageBuilderResult<()> {
        self.record(format!("tag {} {}", source, target));
        let mut state = self.state.lock().unwrap();
        if let Some(digest) = state.digests.get(source).cloned() {
            state.digests.insert(target.to_string(), digest);
        }
        if let Some(layers) = state.layers.get(source).cloned() {
            state.layers.insert(target.to_string(), layers);
        }
        Ok(())
    }

    async fn push(&self, image: &str) -> ImageBuilderResult<()> {
        self.record(format!("push {}", image));
        Ok(())
    }

    async fn create_manifest_list(&self, name: &str, images: &[String]) -> ImageBuilderResult<()> {
        self.record(format!("manifest create {} {}", name, images.join(" ")));
        Ok(())
    }

    async fn push_manifest_list(&self, name: &str) -> ImageBuilderResult<()> {
        self.record(format!("manifest push {}", name));
        Ok(())
    }

    fn engine_name(&self) -> &'static str {
        "Fake"
    }
}

/// Source control with fixed commit SHAs per path
pub struct FakeSourceControl {
    default_sha: String,
    shas: Mutex<HashMap<PathBuf, String>>,
    lookups: AtomicUsize,
}

impl FakeSourceControl {
    pub fn new(default_sha: &str) -> Self {
        Self {
            default_sha: default_sha.to_string(),
            shas: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_sha(self, path: impl Into<PathBuf>, sha: &str) -> Self {
        self.shas.lock().unwrap().insert(path.into(), sha.to_string());
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn get_commit_sha(&self, path: &Path) -> ImageBuilderResult<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .shas
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| self.default_sha.clone()))
    }
}

/// Registry serving fixed digests
#[derive(Default)]
pub struct FakeRegistry {
    digests: Mutex<HashMap<String, String>>,
    lookups: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digest(self, image: &str, digest: &str) -> Self {
        self.digests
            .lock()
            .unwrap()
            .insert(image.to_string(), digest.to_string());
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn get_manifest_digest(&self, image: &str) -> ImageBuilderResult<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.digests
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or_else(|| ImageBuilderError::DigestLookup {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            })
    }
}

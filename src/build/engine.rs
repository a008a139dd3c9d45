//! Build execution
//!
//! Walks the manifest graph dependencies first. Platforms sharing a
//! Dockerfile and build arguments on top of the same base image digest form
//! a build unit: the unit is decided once, and either every member reuses
//! the prior image or the image is built once and tagged for every member.

use crate::build::decision::{evaluate, CacheDecision, MissReason, PlatformIdentity};
use crate::build::naming::{reference_tag, ImageNaming};
use crate::cache::{DigestCache, UnitKey};
use crate::config::BuildConfig;
use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::ledger::{digest_sha, ImageArtifactDetails, ManifestData, PlatformData};
use crate::manifest::{
    Image, Manifest, ManifestGraph, NodeId, PlatformFilter, PlatformKey, PlatformNode,
    ResolvedRef, Tag,
};
use crate::orchestration::{BuildRequest, ImageEngine, RegistryClient, SourceControl};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Marker the engine prints when a build step downloads layers
const PULL_MARKER: &str = "Pulling from";

/// Run-level build switches
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Push images and publish manifest lists
    pub push: bool,
    /// Base images are expected locally already
    pub skip_pulling: bool,
    pub cache_enabled: bool,
    /// Repository URL commit links are built from
    pub source_repo_url: Option<String>,
    pub filter: PlatformFilter,
}

impl BuildOptions {
    pub fn from_config(build: &BuildConfig) -> Self {
        Self {
            push: build.push,
            skip_pulling: build.skip_pulling,
            cache_enabled: build.cache_enabled,
            source_repo_url: build.source_repo_url.clone(),
            filter: PlatformFilter::default(),
        }
    }
}

/// Decision taken for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformOutcome {
    pub repo: String,
    pub key: PlatformKey,
    pub decision: CacheDecision,
}

/// Result of a build run
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Image info for the platforms processed in this run
    pub image_info: ImageArtifactDetails,
    /// One entry per processed platform, in manifest order
    pub outcomes: Vec<PlatformOutcome>,
}

impl BuildReport {
    pub fn cached(&self) -> usize {
        self.outcomes.iter().filter(|o| o.decision.use_cache()).count()
    }

    pub fn built(&self) -> usize {
        self.outcomes.len() - self.cached()
    }
}

type OutputHandler = Box<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct RunState {
    selected: HashSet<NodeId>,
    digests: HashMap<NodeId, Option<String>>,
    platforms: BTreeMap<NodeId, PlatformData>,
    decisions: BTreeMap<NodeId, CacheDecision>,
}

/// A platform's own tags followed by its image's shared tags, local ones
/// included
fn declared_tags<'m>(manifest: &'m Manifest, node: &'m PlatformNode) -> impl Iterator<Item = &'m Tag> {
    let shared = manifest
        .image(&node.image_key)
        .map(|image| image.shared_tags.as_slice())
        .unwrap_or_default();
    node.platform.tags.iter().chain(shared)
}

/// Executes builds for a manifest against the configured collaborators
pub struct BuildEngine<'a> {
    engine: &'a dyn ImageEngine,
    source_control: &'a dyn SourceControl,
    registry: &'a dyn RegistryClient,
    naming: ImageNaming,
    options: BuildOptions,
    on_output: OutputHandler,
    base_digests: DigestCache<Option<String>>,
    commits: DigestCache,
}

impl<'a> BuildEngine<'a> {
    pub fn new(
        engine: &'a dyn ImageEngine,
        source_control: &'a dyn SourceControl,
        registry: &'a dyn RegistryClient,
        naming: ImageNaming,
        options: BuildOptions,
    ) -> Self {
        Self {
            engine,
            source_control,
            registry,
            naming,
            options,
            on_output: Box::new(|line| debug!("{}", line)),
            base_digests: DigestCache::new(),
            commits: DigestCache::new(),
        }
    }

    /// Receive build output lines as they are produced
    pub fn with_output_handler(mut self, handler: OutputHandler) -> Self {
        self.on_output = handler;
        self
    }

    /// Process every platform passing the filter.
    ///
    /// `prior` must carry manifest identities (see [`crate::ledger::reconcile`]).
    pub async fn run(
        &self,
        manifest: &Manifest,
        graph: &ManifestGraph,
        prior: &ImageArtifactDetails,
    ) -> ImageBuilderResult<BuildReport> {
        let selected: Vec<NodeId> = graph
            .nodes()
            .iter()
            .filter(|n| self.options.filter.matches(&n.platform))
            .map(|n| n.id)
            .collect();

        if self.options.cache_enabled && self.options.source_repo_url.is_none() {
            warn!("No source repo URL configured; commits are not recorded and nothing can be reused");
        }

        let mut state = RunState {
            selected: selected.iter().copied().collect(),
            ..Default::default()
        };

        for id in graph.build_order(&selected) {
            if state.platforms.contains_key(&id) {
                continue;
            }
            self.process_unit(manifest, graph, prior, id, &mut state)
                .await?;
        }

        let mut image_info = ImageArtifactDetails::default();
        let mut outcomes = Vec::with_capacity(state.platforms.len());

        for (id, platform) in &state.platforms {
            let node = graph.node(*id);
            let product_version = manifest
                .image(&node.image_key)
                .and_then(|i| i.product_version.as_deref());
            image_info
                .image_mut_or_insert(&node.image_key, product_version)
                .platforms
                .push(platform.clone());

            if let Some(decision) = state.decisions.get(id) {
                outcomes.push(PlatformOutcome {
                    repo: node.repo.clone(),
                    key: node.key(),
                    decision: decision.clone(),
                });
            }
        }

        for image in manifest.repos.iter().flat_map(|r| r.images.iter()) {
            if let Some(data) = self.publish_manifest(image, graph, &state).await? {
                image_info
                    .image_mut_or_insert(&image.key, image.product_version.as_deref())
                    .manifest = Some(data);
            }
        }

        Ok(BuildReport {
            image_info,
            outcomes,
        })
    }

    async fn process_unit(
        &self,
        manifest: &Manifest,
        graph: &ManifestGraph,
        prior: &ImageArtifactDetails,
        id: NodeId,
        state: &mut RunState,
    ) -> ImageBuilderResult<()> {
        let node = graph.node(id);
        let dockerfile = &node.platform.dockerfile;

        let base_digest = self.prepare_base_images(graph, node, state).await?;
        let identity = PlatformIdentity {
            base_digest,
            commit_sha: self.commit_sha(manifest, dockerfile).await?,
            build_args: node.platform.build_args.clone(),
        };
        let unit = UnitKey::new(dockerfile, &identity.build_args, identity.base_digest.as_deref());

        let members = self
            .unit_members(graph, node, identity.base_digest.as_deref(), state)
            .await?;
        debug!("Build unit {} for {} covers {} platform(s)", unit, dockerfile, members.len());

        let priors: Vec<Option<&PlatformData>> = members
            .iter()
            .map(|m| prior.find_platform(&m.image_key, &m.key()))
            .collect();

        let mut decisions: Vec<CacheDecision> = if self.options.cache_enabled {
            members
                .iter()
                .zip(&priors)
                .map(|(m, p)| evaluate(&identity, &m.platform.simple_tags(), *p))
                .collect()
        } else {
            vec![CacheDecision::Miss(MissReason::CachingDisabled); members.len()]
        };

        let hit = decisions
            .iter()
            .enumerate()
            .find_map(|(idx, d)| d.effective_digest().map(|digest| (idx, digest.to_string())));

        let reused = match hit {
            Some((hit_idx, digest)) => {
                if self.pull_cached(node, &digest).await? {
                    for (idx, member) in members.iter().enumerate() {
                        for tag in self.member_tags(manifest, member) {
                            self.engine.tag(&digest, &tag).await?;
                        }
                        decisions[idx] = CacheDecision::Hit {
                            digest: format!(
                                "{}@{}",
                                self.naming.target_repo(&member.repo),
                                digest_sha(&digest)
                            ),
                            inferred: idx != hit_idx,
                        };
                    }
                    info!("Reusing {} for {}", digest, dockerfile);
                    true
                } else {
                    info!("Cached image {} is not based on the current base image", digest);
                    decisions.fill(CacheDecision::Miss(MissReason::BaseImageChanged));
                    false
                }
            }
            None => false,
        };

        if !reused {
            self.build_unit(manifest, node, &members, &unit).await?;
        }

        for ((member, decision), previous) in members.iter().zip(decisions).zip(priors) {
            let data = self
                .finish_platform(manifest, member, &decision, &identity, previous, &unit)
                .await?;
            state.digests.insert(member.id, data.digest.clone());
            state.platforms.insert(member.id, data);
            state.decisions.insert(member.id, decision);
        }

        Ok(())
    }

    /// Unprocessed siblings of `node` whose bases resolve to the same digest.
    ///
    /// Siblings waiting on an internal base not yet processed, or sitting on
    /// a different base, are left to form their own units.
    async fn unit_members<'g>(
        &self,
        graph: &'g ManifestGraph,
        node: &'g PlatformNode,
        base_digest: Option<&str>,
        state: &RunState,
    ) -> ImageBuilderResult<Vec<&'g PlatformNode>> {
        let mut members = vec![node];
        let mut prepared_others = false;

        for id in graph.siblings(node.id) {
            if id == node.id || !state.selected.contains(&id) || state.platforms.contains_key(&id) {
                continue;
            }
            let candidate = graph.node(id);
            let waiting = candidate
                .dependencies()
                .iter()
                .any(|dep| state.selected.contains(dep) && !state.platforms.contains_key(dep));
            if waiting {
                continue;
            }

            prepared_others = true;
            let digest = self.prepare_base_images(graph, candidate, state).await?;
            if digest.as_deref() == base_digest {
                members.push(candidate);
            } else {
                debug!(
                    "{} ({}) sits on a different base image; building it separately",
                    candidate.platform.dockerfile, candidate.platform.architecture
                );
            }
        }

        // Local base names must point at this unit's bases again
        if prepared_others {
            self.prepare_base_images(graph, node, state).await?;
        }

        Ok(members)
    }

    /// Pull a cached image and check it still sits on the current base image
    async fn pull_cached(&self, node: &PlatformNode, digest: &str) -> ImageBuilderResult<bool> {
        self.engine.pull(digest).await?;

        let Some(base) = node.base().reference() else {
            return Ok(true);
        };
        if self.options.skip_pulling {
            return Ok(true);
        }

        let base_layers = self.engine.get_layers(base).await?;
        let image_layers = self.engine.get_layers(digest).await?;
        Ok(image_layers.starts_with(&base_layers))
    }

    async fn build_unit(
        &self,
        manifest: &Manifest,
        node: &PlatformNode,
        members: &[&PlatformNode],
        unit: &UnitKey,
    ) -> ImageBuilderResult<()> {
        let dockerfile = &node.platform.dockerfile;
        let mut tags = self.member_tags(manifest, node);
        tags.push(unit.local_tag());

        let request = BuildRequest {
            dockerfile: manifest.base_dir.join(dockerfile),
            context: manifest.base_dir.join(node.platform.context_dir()),
            tags,
            build_args: node.platform.build_args.clone(),
            platform: node.platform.platform_spec(),
        };

        info!("Building {} with {}", dockerfile, self.engine.engine_name());
        let output = self.engine.build(&request, self.on_output.as_ref()).await?;

        if self.options.push && !self.options.skip_pulling && output.contains(PULL_MARKER) {
            return Err(ImageBuilderError::UnexpectedPull {
                dockerfile: dockerfile.clone(),
            });
        }

        for member in members.iter().filter(|m| m.id != node.id) {
            for tag in self.member_tags(manifest, member) {
                self.engine.tag(&unit.local_tag(), &tag).await?;
            }
        }

        Ok(())
    }

    /// Tag, push and record one platform after its unit was decided
    async fn finish_platform(
        &self,
        manifest: &Manifest,
        node: &PlatformNode,
        decision: &CacheDecision,
        identity: &PlatformIdentity,
        previous: Option<&PlatformData>,
        unit: &UnitKey,
    ) -> ImageBuilderResult<PlatformData> {
        let platform = &node.platform;

        if self.naming.has_override() {
            for tag in declared_tags(manifest, node) {
                self.engine
                    .tag(
                        &self.naming.target_ref(&node.repo, &tag.name),
                        &self.naming.canonical_ref(&node.repo, &tag.name),
                    )
                    .await?;
            }
        }

        for tag in platform.tags.iter().filter(|t| !t.is_local) {
            let reference = self.naming.target_ref(&node.repo, &tag.name);
            if self.options.push {
                self.engine.push(&reference).await?;
            }
            if let Some(syndication) = &tag.syndication {
                for destination in syndication.destinations(&tag.name) {
                    let syndicated = self.naming.target_ref(&syndication.repo, &destination);
                    self.engine.tag(&reference, &syndicated).await?;
                    if self.options.push {
                        self.engine.push(&syndicated).await?;
                    }
                }
            }
        }

        let image_ref = match (platform.primary_tag(), decision.effective_digest()) {
            (Some(tag), _) => self.naming.target_ref(&node.repo, &tag.name),
            (None, Some(digest)) => digest.to_string(),
            (None, None) => unit.local_tag(),
        };

        let digest = match decision.effective_digest() {
            Some(digest) => Some(digest.to_string()),
            None => self.engine.get_digest(&image_ref).await?.map(|d| {
                format!("{}@{}", self.naming.target_repo(&node.repo), digest_sha(&d))
            }),
        };

        let created = self.engine.get_created_date(&image_ref).await?;

        let commit_url = self.options.source_repo_url.as_ref().map(|url| {
            format!(
                "{}/blob/{}/{}",
                url.trim_end_matches('/'),
                identity.commit_sha,
                platform.dockerfile
            )
        });

        let mut simple_tags: BTreeSet<String> = previous
            .map(|p| p.simple_tags.clone())
            .unwrap_or_default();
        simple_tags.extend(platform.simple_tags());

        let mut data = PlatformData::from_key(&platform.key());
        data.digest = digest;
        data.base_image_digest = identity.base_digest.clone();
        data.created = Some(created);
        data.commit_url = commit_url;
        data.build_args = platform.build_args.clone();
        data.simple_tags = simple_tags;
        data.is_unchanged = decision.use_cache();

        Ok(data)
    }

    /// Target references of every tag a platform is published under
    fn member_tags(&self, manifest: &Manifest, node: &PlatformNode) -> Vec<String> {
        declared_tags(manifest, node)
            .map(|tag| self.naming.target_ref(&node.repo, &tag.name))
            .collect()
    }

    /// Make every stage's base image available locally; returns the final
    /// stage's digest
    async fn prepare_base_images(
        &self,
        graph: &ManifestGraph,
        node: &PlatformNode,
        state: &RunState,
    ) -> ImageBuilderResult<Option<String>> {
        let mut digest = None;

        for stage in &node.stages {
            digest = match stage {
                ResolvedRef::None => None,
                ResolvedRef::External(reference) => self.prepare_external(reference).await?,
                ResolvedRef::Internal { reference, node: dep } if state.selected.contains(dep) => {
                    self.name_built_base(graph.node(*dep), reference).await?;
                    state.digests.get(dep).cloned().flatten()
                }
                ResolvedRef::Internal { reference, node: dep } => {
                    self.prepare_internal(graph.node(*dep), reference).await?
                }
            };
        }

        Ok(digest)
    }

    async fn prepare_external(&self, reference: &str) -> ImageBuilderResult<Option<String>> {
        self.base_digests
            .get_or_fetch(reference, || async {
                if !self.options.skip_pulling {
                    match self.naming.mirror_ref(reference) {
                        Some(mirror) => {
                            self.engine.pull(&mirror).await?;
                            self.engine.tag(&mirror, reference).await?;
                        }
                        None => self.engine.pull(reference).await?,
                    }
                }
                self.engine.get_digest(reference).await
            })
            .await
    }

    /// Where this run's images put the platform-specific image of `dep`
    fn internal_source(&self, dep: &PlatformNode, reference: &str) -> String {
        let tag = dep
            .platform
            .primary_tag()
            .map(|t| t.name.as_str())
            .or_else(|| reference_tag(reference))
            .unwrap_or("latest");
        self.naming.target_ref(&dep.repo, tag)
    }

    /// Internal base built in this run: a shared tag may name another
    /// architecture's image locally, so point it at `dep`'s
    async fn name_built_base(&self, dep: &PlatformNode, reference: &str) -> ImageBuilderResult<()> {
        let source = self.internal_source(dep, reference);
        if source != reference {
            self.engine.tag(&source, reference).await?;
        }
        Ok(())
    }

    /// Internal base not built in this run: fetch it from where this run's
    /// images live and name it the way the Dockerfile refers to it
    async fn prepare_internal(
        &self,
        dep: &PlatformNode,
        reference: &str,
    ) -> ImageBuilderResult<Option<String>> {
        let source = self.internal_source(dep, reference);

        let digest = self
            .base_digests
            .get_or_fetch(&source, || async {
                if !self.options.skip_pulling {
                    self.engine.pull(&source).await?;
                }
                self.engine.get_digest(&source).await
            })
            .await?;

        if !self.options.skip_pulling && source != reference {
            self.engine.tag(&source, reference).await?;
        }
        Ok(digest)
    }

    async fn commit_sha(&self, manifest: &Manifest, dockerfile: &str) -> ImageBuilderResult<String> {
        let path = manifest.base_dir.join(dockerfile);
        self.commits
            .get_or_fetch(dockerfile, || self.source_control.get_commit_sha(&path))
            .await
    }

    /// Publish the image's shared tags as manifest lists.
    ///
    /// Returns `None` when none of the image's platforms were processed.
    async fn publish_manifest(
        &self,
        image: &Image,
        graph: &ManifestGraph,
        state: &RunState,
    ) -> ImageBuilderResult<Option<ManifestData>> {
        let shared_tags = image.shared_tag_names();
        if shared_tags.is_empty() {
            return Ok(None);
        }

        let nodes: Vec<&PlatformNode> = graph
            .nodes()
            .iter()
            .filter(|n| n.image_key == image.key)
            .collect();
        if !nodes.iter().any(|n| state.platforms.contains_key(&n.id)) {
            return Ok(None);
        }

        let mut data = ManifestData {
            shared_tags,
            ..Default::default()
        };
        if !self.options.push {
            return Ok(Some(data));
        }
        if !nodes.iter().all(|n| state.platforms.contains_key(&n.id)) {
            debug!(
                "Not publishing manifest list for {}: not every platform was processed",
                image.key
            );
            return Ok(Some(data));
        }

        let members: Vec<String> = nodes
            .iter()
            .filter_map(|n| {
                n.platform
                    .primary_tag()
                    .map(|t| self.naming.target_ref(&n.repo, &t.name))
            })
            .collect();

        let target_repo = self.naming.target_repo(&image.key.repo);
        for tag in image.shared_tags.iter().filter(|t| !t.is_local) {
            let name = format!("{}:{}", target_repo, tag.name);
            let digest = self.publish_list(&name, &members).await?;
            if data.digest.is_none() {
                data.digest = Some(format!("{}@{}", target_repo, digest_sha(&digest)));
            }

            if let Some(syndication) = &tag.syndication {
                let syndicated_repo = self.naming.target_repo(&syndication.repo);
                for destination in syndication.destinations(&tag.name) {
                    let name = format!("{}:{}", syndicated_repo, destination);
                    let digest = self.publish_list(&name, &members).await?;
                    data.syndicated_digests
                        .insert(format!("{}@{}", syndicated_repo, digest_sha(&digest)));
                }
            }
        }
        data.created = Some(Utc::now());

        Ok(Some(data))
    }

    async fn publish_list(&self, name: &str, members: &[String]) -> ImageBuilderResult<String> {
        info!("Publishing manifest list {}", name);
        self.engine.create_manifest_list(name, members).await?;
        self.engine.push_manifest_list(name).await?;
        self.registry.get_manifest_digest(name).await
    }
}

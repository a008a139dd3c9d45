//! Stale image detection
//!
//! A platform is a stale root when it was never built or when the external
//! image it builds FROM now has a different digest than the one recorded.
//! Staleness then flows to every platform building FROM a stale one.

use crate::cache::DigestCache;
use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::ledger::{self, digests_equal, ImageArtifactDetails};
use crate::manifest::{
    os_type_matches, Manifest, ManifestGraph, NodeId, PlatformFilter, ResolvedRef,
};
use crate::orchestration::RegistryClient;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A manifest checkout to check for stale images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,

    /// Manifest path relative to `root`
    pub manifest_path: String,

    /// Local checkout of the subscribed repository
    pub root: PathBuf,

    #[serde(default = "any_os")]
    pub os_type: String,

    /// Prior image info for this subscription, overriding the command-level one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_info_path: Option<PathBuf>,
}

fn any_os() -> String {
    "*".to_string()
}

/// Stale Dockerfile paths of one subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionImagePaths {
    pub subscription: String,
    pub image_paths: Vec<String>,
}

/// Read a subscriptions file
pub async fn load_subscriptions(path: &Path) -> ImageBuilderResult<Vec<Subscription>> {
    if !path.exists() {
        return Err(ImageBuilderError::PathNotFound(path.to_path_buf()));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        ImageBuilderError::io(format!("reading subscriptions {}", path.display()), e)
    })?;

    serde_json::from_str(&content).map_err(|e| ImageBuilderError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Computes stale platforms, memoizing registry digests across calls
pub struct StalenessResolver<'a> {
    registry: &'a dyn RegistryClient,
    digests: DigestCache,
}

impl<'a> StalenessResolver<'a> {
    pub fn new(registry: &'a dyn RegistryClient) -> Self {
        Self {
            registry,
            digests: DigestCache::new(),
        }
    }

    /// Current registry digest of an external image
    async fn current_digest(&self, reference: &str) -> ImageBuilderResult<String> {
        self.digests
            .get_or_fetch(reference, || self.registry.get_manifest_digest(reference))
            .await
    }

    /// Dockerfile paths needing a rebuild, dependencies before dependents.
    ///
    /// `prior` must carry manifest identities (see [`ledger::reconcile`]).
    pub async fn compute_stale_paths(
        &self,
        graph: &ManifestGraph,
        prior: &ImageArtifactDetails,
        filter: &PlatformFilter,
    ) -> ImageBuilderResult<Vec<String>> {
        let considered: Vec<NodeId> = graph
            .nodes()
            .iter()
            .filter(|n| filter.matches(&n.platform))
            .map(|n| n.id)
            .collect();

        let mut roots = Vec::new();
        for &id in &considered {
            let node = graph.node(id);
            let fresh = match node.base() {
                ResolvedRef::External(reference) => Some(self.current_digest(reference).await?),
                ResolvedRef::Internal { .. } | ResolvedRef::None => None,
            };

            let Some(previous) = prior.find_platform(&node.image_key, &node.key()) else {
                debug!("{} has no prior build", node.platform.dockerfile);
                roots.push(id);
                continue;
            };

            if let Some(fresh) = fresh {
                let changed = previous
                    .base_image_digest
                    .as_deref()
                    .is_none_or(|recorded| !digests_equal(recorded, &fresh));
                if changed {
                    debug!(
                        "{} base image {} changed to {}",
                        node.platform.dockerfile,
                        node.base().reference().unwrap_or_default(),
                        fresh
                    );
                    roots.push(id);
                }
            }
        }

        let wanted: HashSet<NodeId> = considered.into_iter().collect();
        let mut visited = HashSet::new();
        let mut emitted = HashSet::new();
        let mut paths = Vec::new();

        for root in roots {
            self.collect_dependents(graph, root, &wanted, &mut visited, &mut emitted, &mut paths);
        }

        info!("Found {} stale image path(s)", paths.len());
        Ok(paths)
    }

    fn collect_dependents(
        &self,
        graph: &ManifestGraph,
        id: NodeId,
        wanted: &HashSet<NodeId>,
        visited: &mut HashSet<NodeId>,
        emitted: &mut HashSet<String>,
        paths: &mut Vec<String>,
    ) {
        if !visited.insert(id) {
            return;
        }

        let dockerfile = &graph.node(id).platform.dockerfile;
        if wanted.contains(&id) && emitted.insert(dockerfile.clone()) {
            paths.push(dockerfile.clone());
        }

        for &dependent in graph.dependents(id) {
            self.collect_dependents(graph, dependent, wanted, visited, emitted, paths);
        }
    }

    /// Stale paths for every subscription whose OS type passes `os_type`.
    ///
    /// Each subscription reads its own prior image info if it names one,
    /// else `default_image_info`; a missing file means nothing was built.
    pub async fn get_stale_images(
        &self,
        subscriptions: &[Subscription],
        os_type: &str,
        default_image_info: Option<&Path>,
        filter: &PlatformFilter,
    ) -> ImageBuilderResult<Vec<SubscriptionImagePaths>> {
        let mut results = Vec::new();

        for subscription in subscriptions
            .iter()
            .filter(|s| os_type_matches(os_type, &s.os_type))
        {
            info!("Checking subscription {}", subscription.id);

            let manifest =
                Manifest::load(&subscription.root.join(&subscription.manifest_path)).await?;
            let graph = ManifestGraph::load(&manifest).await?;

            let persisted = match subscription.image_info_path.as_deref().or(default_image_info) {
                Some(path) => ImageArtifactDetails::load_or_default(path).await?,
                None => ImageArtifactDetails::default(),
            };
            let prior = ledger::reconcile(&manifest, &persisted);

            let mut filter = filter.clone();
            if filter.os_type.is_none() {
                filter.os_type = Some(subscription.os_type.clone());
            }

            let image_paths = self.compute_stale_paths(&graph, &prior, &filter).await?;
            results.push(SubscriptionImagePaths {
                subscription: subscription.id.clone(),
                image_paths,
            });
        }

        Ok(results)
    }
}

//! Manifest platform graph
//!
//! Every manifest platform is a node addressed by [`NodeId`]. Each build stage
//! of its Dockerfile resolves either to another node (an image the manifest
//! itself produces) or to an external image. Nodes sharing a Dockerfile stay
//! distinct; identity lives in [`PlatformKey`], never in object addresses.

use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::manifest::dockerfile::{parse_stages, BaseRef};
use crate::manifest::model::{ImageKey, Manifest, Platform, PlatformKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Index of a node in the graph
pub type NodeId = usize;

/// Resolution of one stage's base image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedRef {
    /// Produced by another platform of the manifest
    Internal { reference: String, node: NodeId },
    /// Lives outside the manifest
    External(String),
    /// `scratch` or an argument-only reference
    None,
}

impl ResolvedRef {
    /// The image reference as written after substitution
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Internal { reference, .. } => Some(reference),
            Self::External(reference) => Some(reference),
            Self::None => None,
        }
    }

    pub fn internal_node(&self) -> Option<NodeId> {
        match self {
            Self::Internal { node, .. } => Some(*node),
            _ => None,
        }
    }
}

/// A platform node
#[derive(Debug, Clone)]
pub struct PlatformNode {
    pub id: NodeId,
    pub repo: String,
    pub image_key: ImageKey,
    pub platform: Platform,
    /// One entry per build stage, final stage last
    pub stages: Vec<ResolvedRef>,
}

impl PlatformNode {
    /// The platform's base image: the final stage's reference
    pub fn base(&self) -> &ResolvedRef {
        self.stages.last().unwrap_or(&ResolvedRef::None)
    }

    pub fn key(&self) -> PlatformKey {
        self.platform.key()
    }

    /// Internal nodes any stage depends on, deduplicated, in stage order
    pub fn dependencies(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .filter_map(ResolvedRef::internal_node)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// Graph of manifest platforms and their FROM edges
#[derive(Debug, Clone)]
pub struct ManifestGraph {
    nodes: Vec<PlatformNode>,
    dependents: Vec<Vec<NodeId>>,
}

impl ManifestGraph {
    /// Build the graph, reading every Dockerfile from the manifest directory.
    ///
    /// A platform whose Dockerfile is missing fails the whole load.
    pub async fn load(manifest: &Manifest) -> ImageBuilderResult<Self> {
        let mut contents = HashMap::new();

        for (_, platform) in manifest.platforms() {
            if contents.contains_key(&platform.dockerfile) {
                continue;
            }
            let path = manifest.base_dir.join(&platform.dockerfile);
            if !path.is_file() {
                return Err(ImageBuilderError::DockerfileNotFound(path));
            }
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                ImageBuilderError::io(format!("reading Dockerfile {}", path.display()), e)
            })?;
            contents.insert(platform.dockerfile.clone(), content);
        }

        Self::from_contents(manifest, &contents)
    }

    /// Build the graph from Dockerfile contents keyed by manifest path
    pub fn from_contents(
        manifest: &Manifest,
        contents: &HashMap<String, String>,
    ) -> ImageBuilderResult<Self> {
        let mut nodes = Vec::new();

        for repo in &manifest.repos {
            for image in &repo.images {
                for platform in &image.platforms {
                    nodes.push(PlatformNode {
                        id: nodes.len(),
                        repo: repo.name.clone(),
                        image_key: image.key.clone(),
                        platform: platform.clone(),
                        stages: Vec::new(),
                    });
                }
            }
        }

        let index = TagIndex::new(manifest, &nodes);

        for id in 0..nodes.len() {
            let platform = &nodes[id].platform;
            let content = contents.get(&platform.dockerfile).ok_or_else(|| {
                ImageBuilderError::DockerfileNotFound(manifest.base_dir.join(&platform.dockerfile))
            })?;

            let stages = parse_stages(content, &platform.build_args).map_err(|reason| {
                ImageBuilderError::DockerfileInvalid {
                    path: manifest.base_dir.join(&platform.dockerfile),
                    reason,
                }
            })?;

            let resolved = stages
                .iter()
                .map(|stage| match &stage.base {
                    BaseRef::Image(reference) => match index.resolve(reference, &nodes[id]) {
                        Some(node) => ResolvedRef::Internal {
                            reference: reference.clone(),
                            node,
                        },
                        None => ResolvedRef::External(reference.clone()),
                    },
                    BaseRef::Scratch | BaseRef::Unresolved(_) => ResolvedRef::None,
                })
                .collect();

            nodes[id].stages = resolved;
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            for dep in node.dependencies() {
                dependents[dep].push(node.id);
            }
        }

        debug!("Built manifest graph with {} platform nodes", nodes.len());
        Ok(Self { nodes, dependents })
    }

    pub fn nodes(&self) -> &[PlatformNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &PlatformNode {
        &self.nodes[id]
    }

    /// Nodes whose Dockerfile builds FROM the given node
    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.dependents[id]
    }

    /// Nodes sharing Dockerfile path and build arguments with the given node,
    /// the node itself included, in declaration order. Whether they share a
    /// base image digest is only known at build time.
    pub fn siblings(&self, id: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[id];
        self.nodes
            .iter()
            .filter(|n| {
                n.platform.dockerfile == node.platform.dockerfile
                    && n.platform.build_args == node.platform.build_args
            })
            .map(|n| n.id)
            .collect()
    }

    /// Order the given nodes so internal dependencies come first, keeping
    /// declaration order otherwise. Nodes outside `subset` are not emitted.
    pub fn build_order(&self, subset: &[NodeId]) -> Vec<NodeId> {
        let wanted: HashSet<NodeId> = subset.iter().copied().collect();
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(subset.len());

        let mut sorted: Vec<NodeId> = subset.to_vec();
        sorted.sort_unstable();

        for id in sorted {
            self.visit(id, &wanted, &mut visited, &mut order);
        }

        order
    }

    fn visit(
        &self,
        id: NodeId,
        wanted: &HashSet<NodeId>,
        visited: &mut HashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) {
        // Marking before recursing also terminates on cycles
        if !visited.insert(id) {
            return;
        }

        for dep in self.nodes[id].dependencies() {
            self.visit(dep, wanted, visited, order);
        }

        if wanted.contains(&id) {
            order.push(id);
        }
    }
}

/// Lookup from `repo:tag` to the nodes producing it
struct TagIndex {
    registry: Option<String>,
    platforms: Vec<Platform>,
    simple: HashMap<String, NodeId>,
    shared: HashMap<String, Vec<NodeId>>,
}

impl TagIndex {
    fn new(manifest: &Manifest, nodes: &[PlatformNode]) -> Self {
        let mut simple = HashMap::new();
        let mut shared: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut by_image: BTreeMap<&ImageKey, Vec<NodeId>> = BTreeMap::new();

        for node in nodes {
            by_image.entry(&node.image_key).or_default().push(node.id);
            for tag in &node.platform.tags {
                simple
                    .entry(format!("{}:{}", node.repo, tag.name))
                    .or_insert(node.id);
            }
        }

        for image in manifest.repos.iter().flat_map(|r| r.images.iter()) {
            let Some(members) = by_image.get(&image.key) else {
                continue;
            };
            for tag in &image.shared_tags {
                shared
                    .entry(format!("{}:{}", image.key.repo, tag.name))
                    .or_insert_with(|| members.clone());
            }
        }

        Self {
            registry: manifest.registry.clone(),
            platforms: nodes.iter().map(|n| n.platform.clone()).collect(),
            simple,
            shared,
        }
    }

    fn resolve(&self, reference: &str, from: &PlatformNode) -> Option<NodeId> {
        // Digest-pinned references never point at something built here
        if reference.contains('@') {
            return None;
        }

        let local = match &self.registry {
            Some(registry) => reference
                .strip_prefix(registry.as_str())
                .and_then(|r| r.strip_prefix('/'))
                .unwrap_or(reference),
            None => reference,
        };

        let found = self.simple.get(local).copied().or_else(|| {
            let members = self.shared.get(local)?;
            // A shared tag is a multi-arch manifest list; pick the member a
            // build on `from`'s platform would pull.
            members
                .iter()
                .copied()
                .find(|id| {
                    let candidate = &self.platforms[*id];
                    candidate.os_type == from.platform.os_type
                        && candidate.architecture == from.platform.architecture
                        && candidate.variant == from.platform.variant
                })
                .or_else(|| members.first().copied())
        });

        found.filter(|id| *id != from.id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Manifest with the runtime-deps → runtime → aspnet chain on top of an
    /// external base image, for amd64 and arm64.
    pub(crate) const CHAIN_MANIFEST: &str = r#"
{
  "registry": "mcr.microsoft.com",
  "repos": [
    { "name": "dotnet/runtime-deps", "images": [ { "productVersion": "6.0",
      "sharedTags": { "6.0": {} },
      "platforms": [
        { "dockerfile": "runtime-deps/amd64", "os": "linux", "osVersion": "bullseye-slim",
          "architecture": "amd64", "tags": { "6.0-amd64": {} } },
        { "dockerfile": "runtime-deps/arm64", "os": "linux", "osVersion": "bullseye-slim",
          "architecture": "arm64", "tags": { "6.0-arm64": {} } } ] } ] },
    { "name": "dotnet/runtime", "images": [ { "productVersion": "6.0",
      "platforms": [
        { "dockerfile": "runtime/amd64", "os": "linux", "osVersion": "bullseye-slim",
          "architecture": "amd64", "tags": { "6.0-amd64": {} } },
        { "dockerfile": "runtime/arm64", "os": "linux", "osVersion": "bullseye-slim",
          "architecture": "arm64", "tags": { "6.0-arm64": {} } } ] } ] },
    { "name": "dotnet/aspnet", "images": [ { "productVersion": "6.0",
      "platforms": [
        { "dockerfile": "aspnet/amd64", "os": "linux", "osVersion": "bullseye-slim",
          "architecture": "amd64", "tags": { "6.0-amd64": {} } } ] } ] }
  ]
}
"#;

    pub(crate) fn chain_contents() -> HashMap<String, String> {
        let mut contents = HashMap::new();
        contents.insert(
            "runtime-deps/amd64/Dockerfile".to_string(),
            "FROM debian:bullseye-slim\n".to_string(),
        );
        contents.insert(
            "runtime-deps/arm64/Dockerfile".to_string(),
            "FROM arm64v8/debian:bullseye-slim\n".to_string(),
        );
        contents.insert(
            "runtime/amd64/Dockerfile".to_string(),
            "FROM alpine AS installer\nFROM mcr.microsoft.com/dotnet/runtime-deps:6.0-amd64\n"
                .to_string(),
        );
        contents.insert(
            "runtime/arm64/Dockerfile".to_string(),
            "ARG REPO=mcr.microsoft.com/dotnet/runtime-deps\nFROM $REPO:6.0-arm64\n".to_string(),
        );
        contents.insert(
            "aspnet/amd64/Dockerfile".to_string(),
            "FROM mcr.microsoft.com/dotnet/runtime:6.0-amd64\n".to_string(),
        );
        contents
    }

    pub(crate) fn chain_graph() -> (Manifest, ManifestGraph) {
        let manifest = Manifest::parse(CHAIN_MANIFEST, PathBuf::from("/repo")).unwrap();
        let graph = ManifestGraph::from_contents(&manifest, &chain_contents()).unwrap();
        (manifest, graph)
    }

    #[test]
    fn resolves_internal_and_external_edges() {
        let (_, graph) = chain_graph();

        assert_eq!(
            graph.node(0).base(),
            &ResolvedRef::External("debian:bullseye-slim".into())
        );
        assert_eq!(graph.node(2).base().internal_node(), Some(0));
        assert_eq!(graph.node(3).base().internal_node(), Some(1));
        assert_eq!(graph.node(4).base().internal_node(), Some(2));

        // Non-final stages are recorded but only internal ones become edges
        assert_eq!(graph.node(2).stages.len(), 2);
        assert_eq!(graph.node(2).dependencies(), vec![0]);
        assert_eq!(graph.dependents(0), &[2]);
        assert_eq!(graph.dependents(2), &[4]);
    }

    #[test]
    fn shared_tag_resolves_to_matching_architecture() {
        let manifest = Manifest::parse(CHAIN_MANIFEST, PathBuf::from("/repo")).unwrap();
        let mut contents = chain_contents();
        contents.insert(
            "runtime/arm64/Dockerfile".to_string(),
            "FROM mcr.microsoft.com/dotnet/runtime-deps:6.0\n".to_string(),
        );
        let graph = ManifestGraph::from_contents(&manifest, &contents).unwrap();

        assert_eq!(graph.node(3).base().internal_node(), Some(1));
    }

    #[test]
    fn missing_dockerfile_content_errors() {
        let manifest = Manifest::parse(CHAIN_MANIFEST, PathBuf::from("/repo")).unwrap();
        let mut contents = chain_contents();
        contents.remove("aspnet/amd64/Dockerfile");

        let err = ManifestGraph::from_contents(&manifest, &contents).unwrap_err();
        assert!(matches!(err, ImageBuilderError::DockerfileNotFound(_)));
    }

    #[test]
    fn build_order_puts_dependencies_first() {
        let (_, graph) = chain_graph();

        let order = graph.build_order(&[4, 2, 0]);
        assert_eq!(order, vec![0, 2, 4]);

        // Dependencies outside the subset are skipped, not emitted
        let order = graph.build_order(&[4]);
        assert_eq!(order, vec![4]);
    }

    #[test]
    fn siblings_share_dockerfile_and_args() {
        let manifest = Manifest::parse(
            r#"{ "repos": [
              { "name": "a", "images": [ { "platforms": [
                { "dockerfile": "shared", "os": "linux", "tags": { "x": {} } },
                { "dockerfile": "shared", "os": "linux", "buildArgs": { "V": "2" }, "tags": { "y": {} } } ] } ] },
              { "name": "b", "images": [ { "platforms": [
                { "dockerfile": "shared", "os": "linux", "tags": { "z": {} } } ] } ] } ] }"#,
            PathBuf::from("/repo"),
        )
        .unwrap();
        let mut contents = HashMap::new();
        contents.insert("shared/Dockerfile".to_string(), "FROM alpine\n".to_string());
        let graph = ManifestGraph::from_contents(&manifest, &contents).unwrap();

        assert_eq!(graph.siblings(0), vec![0, 2]);
        assert_eq!(graph.siblings(1), vec![1]);
    }

    #[tokio::test]
    async fn load_reads_dockerfiles_from_disk() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("src").join("app");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Dockerfile"), "FROM alpine:3.19\n").unwrap();

        let manifest = Manifest::parse(
            r#"{ "repos": [ { "name": "app", "images": [ { "platforms": [
                { "dockerfile": "src/app", "os": "linux", "tags": { "1": {} } } ] } ] } ] }"#,
            temp.path().to_path_buf(),
        )
        .unwrap();

        let graph = ManifestGraph::load(&manifest).await.unwrap();
        assert_eq!(graph.node(0).base(), &ResolvedRef::External("alpine:3.19".into()));

        std::fs::remove_file(dir.join("Dockerfile")).unwrap();
        let err = ManifestGraph::load(&manifest).await.unwrap_err();
        assert!(matches!(err, ImageBuilderError::DockerfileNotFound(_)));
    }
}

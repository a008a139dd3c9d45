//! Image info ledger
//!
//! The persisted record of what was built, and the merge that folds sharded
//! build outputs together.

pub mod merge;
pub mod model;

pub use merge::{merge, MergeOptions};
pub use model::{
    commit_sha_from_url, digest_sha, digests_equal, ImageArtifactDetails, ImageData,
    ManifestData, PlatformData, RepoData,
};

use crate::manifest::Manifest;
use tracing::debug;

/// Prior build state as seen through the current manifest.
///
/// The persisted ledger gets manifest identities attached, entries the
/// manifest no longer declares are dropped, and the rest is merged into a
/// skeleton covering every manifest platform.
pub fn reconcile(manifest: &Manifest, persisted: &ImageArtifactDetails) -> ImageArtifactDetails {
    let mut keyed = persisted.clone();
    keyed.attach_manifest(manifest);

    for repo in &mut keyed.repos {
        let before = repo.images.len();
        repo.images.retain(|image| image.key.is_some());
        if repo.images.len() != before {
            debug!(
                "Dropped {} image(s) of {} not declared in the manifest",
                before - repo.images.len(),
                repo.repo
            );
        }
    }

    let mut prior = ImageArtifactDetails::from_manifest(manifest);
    merge(&keyed, &mut prior, MergeOptions::default());
    prior
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::graph::tests::CHAIN_MANIFEST;
    use std::path::PathBuf;

    #[test]
    fn reconcile_keeps_declared_builds_only() {
        let manifest = Manifest::parse(CHAIN_MANIFEST, PathBuf::from("/repo")).unwrap();
        let persisted = ImageArtifactDetails::parse(
            r#"{ "repos": [
              { "repo": "dotnet/runtime", "images": [ { "productVersion": "6.0", "platforms": [
                { "dockerfile": "runtime/amd64/Dockerfile", "architecture": "amd64",
                  "osType": "linux", "osVersion": "bullseye-slim",
                  "digest": "dotnet/runtime@sha256:1", "simpleTags": ["6.0-amd64"] } ] },
                { "productVersion": "5.0", "platforms": [
                { "dockerfile": "runtime/5.0/Dockerfile", "architecture": "amd64",
                  "osType": "linux", "osVersion": "buster-slim",
                  "digest": "dotnet/runtime@sha256:5" } ] } ] } ] }"#,
        )
        .unwrap();

        let prior = reconcile(&manifest, &persisted);
        let runtime_key = &manifest.repo("dotnet/runtime").unwrap().images[0].key;
        let runtime = prior.image(runtime_key).unwrap();

        assert_eq!(runtime.platforms.len(), 2);
        assert_eq!(
            runtime.platforms[0].digest.as_deref(),
            Some("dotnet/runtime@sha256:1")
        );
        assert!(!runtime.platforms[1].has_build_facts());
        assert_eq!(prior.repo("dotnet/runtime").unwrap().images.len(), 1);

        let arm = manifest.repo("dotnet/runtime").unwrap().images[0].platforms[1].key();
        assert!(prior.find_platform(runtime_key, &arm).is_none());
    }
}

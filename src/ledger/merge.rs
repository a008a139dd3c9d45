//! Ledger merging
//!
//! Folds one partial ledger into another. Sharded builds each write a ledger
//! covering the platforms they built; merging them in sequence yields the
//! published record.

use super::model::{ImageArtifactDetails, ImageData, ManifestData, PlatformData, RepoData};
use crate::manifest::PlatformKey;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// How tag collections combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Take the source's tags verbatim instead of the union
    pub replace_tags: bool,
}

/// Merge `source` into `target`.
///
/// Repos match by name. Images match by [`crate::manifest::ImageKey`] when
/// both sides carry one, otherwise structurally. Platforms match by
/// [`PlatformKey`]. Anything without a counterpart is appended.
pub fn merge(source: &ImageArtifactDetails, target: &mut ImageArtifactDetails, options: MergeOptions) {
    for src_repo in &source.repos {
        match target.repos.iter_mut().find(|r| r.repo == src_repo.repo) {
            Some(dst_repo) => merge_repo(src_repo, dst_repo, options),
            None => target.repos.push(src_repo.clone()),
        }
    }
}

fn merge_repo(source: &RepoData, target: &mut RepoData, options: MergeOptions) {
    let mut claimed = vec![false; target.images.len()];

    for src_image in &source.images {
        match find_image(src_image, &target.images, &claimed, &target.repo) {
            Some(idx) => {
                claimed[idx] = true;
                merge_image(src_image, &mut target.images[idx], options);
            }
            None => {
                debug!(
                    "Appending image {} to repo {}",
                    src_image.product_version.as_deref().unwrap_or("<unversioned>"),
                    target.repo
                );
                target.images.push(src_image.clone());
                claimed.push(true);
            }
        }
    }
}

/// How closely a target image resembles a source image, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Resemblance {
    SoleVersionMatch,
    SharedTagOverlap,
    PlatformOverlap,
    SamePlatforms,
}

fn find_image(
    source: &ImageData,
    targets: &[ImageData],
    claimed: &[bool],
    repo: &str,
) -> Option<usize> {
    let open = |idx: &usize| !claimed[*idx];

    if let Some(key) = &source.key {
        if let Some(idx) = (0..targets.len())
            .filter(open)
            .find(|idx| targets[*idx].key.as_ref() == Some(key))
        {
            return Some(idx);
        }
    }

    let candidates: Vec<usize> = (0..targets.len())
        .filter(open)
        .filter(|idx| {
            let target = &targets[*idx];
            let keys_compatible = match (&source.key, &target.key) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            };
            keys_compatible && target.product_version == source.product_version
        })
        .collect();

    let wanted = source.platform_keys();
    let shared = shared_tags(source);

    let ranked: Vec<(usize, Option<Resemblance>)> = candidates
        .iter()
        .map(|idx| {
            let theirs = targets[*idx].platform_keys();
            let resemblance = if !wanted.is_empty() && theirs == wanted {
                Some(Resemblance::SamePlatforms)
            } else if !wanted.is_disjoint(&theirs) {
                Some(Resemblance::PlatformOverlap)
            } else if !shared.is_empty() && !shared.is_disjoint(&shared_tags(&targets[*idx])) {
                Some(Resemblance::SharedTagOverlap)
            } else if candidates.len() == 1 {
                Some(Resemblance::SoleVersionMatch)
            } else {
                None
            };
            (*idx, resemblance)
        })
        .collect();

    let best = ranked.iter().filter_map(|(_, r)| *r).max()?;
    let mut matching = ranked
        .iter()
        .filter(|(_, r)| *r == Some(best))
        .map(|(idx, _)| *idx);
    let chosen = matching.next()?;

    // Identical platform sets are duplicated images, paired in order. Any
    // other tie stays a separate image.
    if best < Resemblance::SamePlatforms && matching.next().is_some() {
        warn!(
            "Ambiguous merge of image {} in repo {}, keeping it as a separate image",
            source.product_version.as_deref().unwrap_or("<unversioned>"),
            repo
        );
        return None;
    }

    Some(chosen)
}

fn shared_tags(image: &ImageData) -> BTreeSet<String> {
    image
        .manifest
        .as_ref()
        .map(|m| m.shared_tags.clone())
        .unwrap_or_default()
}

fn merge_image(source: &ImageData, target: &mut ImageData, options: MergeOptions) {
    if source.product_version.is_some() {
        target.product_version = source.product_version.clone();
    }
    if target.key.is_none() {
        target.key = source.key.clone();
    }

    target.manifest = match (&source.manifest, target.manifest.take()) {
        (None, _) => None,
        (Some(src), None) => Some(src.clone()),
        (Some(src), Some(mut dst)) => {
            merge_manifest(src, &mut dst, options);
            Some(dst)
        }
    };

    let mut claimed: HashSet<usize> = HashSet::new();
    for src_platform in &source.platforms {
        let key: PlatformKey = src_platform.key();
        let found = target
            .platforms
            .iter()
            .enumerate()
            .find(|(idx, p)| !claimed.contains(idx) && p.key() == key)
            .map(|(idx, _)| idx);

        match found {
            Some(idx) => {
                claimed.insert(idx);
                merge_platform(src_platform, &mut target.platforms[idx], options);
            }
            None => {
                claimed.insert(target.platforms.len());
                target.platforms.push(src_platform.clone());
            }
        }
    }
}

fn merge_manifest(source: &ManifestData, target: &mut ManifestData, options: MergeOptions) {
    if source.digest.is_some() {
        target.digest = source.digest.clone();
    }
    if source.created.is_some() {
        target.created = source.created;
    }
    merge_tags(&source.shared_tags, &mut target.shared_tags, options);
    merge_tags(&source.syndicated_digests, &mut target.syndicated_digests, options);
}

fn merge_platform(source: &PlatformData, target: &mut PlatformData, options: MergeOptions) {
    if source.digest.is_some() {
        target.digest = source.digest.clone();
        target.build_args = source.build_args.clone();
    }
    if source.base_image_digest.is_some() {
        target.base_image_digest = source.base_image_digest.clone();
    }
    if source.created.is_some() {
        target.created = source.created;
    }
    if source.commit_url.is_some() {
        target.commit_url = source.commit_url.clone();
    }
    target.is_unchanged = source.is_unchanged;
    merge_tags(&source.simple_tags, &mut target.simple_tags, options);
}

fn merge_tags(source: &BTreeSet<String>, target: &mut BTreeSet<String>, options: MergeOptions) {
    if options.replace_tags {
        *target = source.clone();
    } else {
        target.extend(source.iter().cloned());
    }
}

//! Image info ledger
//!
//! The persisted record of build results: repo → image → platform, with the
//! digest, base image digest, commit link and tags of every platform build.
//! Serialized as JSON with a fixed key order and sorted tag arrays.

use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::manifest::{ImageKey, Manifest, PlatformKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Root of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageArtifactDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<RepoData>,
}

/// Build results of one repo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoData {
    pub repo: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageData>,
}

/// Build results of one image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    /// Canonical manifest identity, attached when a manifest is available
    #[serde(skip)]
    pub key: Option<ImageKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestData>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<PlatformData>,
}

/// Multi-arch manifest list published for an image's shared tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub shared_tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub syndicated_digests: BTreeSet<String>,
}

/// Build result of one platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformData {
    pub dockerfile: String,

    pub architecture: String,

    pub os_type: String,

    pub os_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image_digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_url: Option<String>,

    /// Build arguments the image was built with
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub simple_tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_unchanged: bool,
}

impl PlatformData {
    /// Entry carrying only the identity fields of a platform
    pub fn from_key(key: &PlatformKey) -> Self {
        Self {
            dockerfile: key.dockerfile.clone(),
            architecture: key.architecture.clone(),
            os_type: key.os_type.clone(),
            os_version: key.os_version.clone(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> PlatformKey {
        PlatformKey {
            dockerfile: self.dockerfile.clone(),
            architecture: self.architecture.clone(),
            os_type: self.os_type.clone(),
            os_version: self.os_version.clone(),
        }
    }

    /// Whether this entry records an actual build, as opposed to the bare
    /// identity carried over from a manifest
    pub fn has_build_facts(&self) -> bool {
        self.digest.is_some() || self.base_image_digest.is_some() || self.commit_url.is_some()
    }

    /// Commit SHA embedded in the commit link (`.../blob/<sha>/<path>`)
    pub fn commit_sha(&self) -> Option<&str> {
        commit_sha_from_url(self.commit_url.as_deref()?)
    }
}

impl ImageData {
    /// Platform identity set, used for structural matching
    pub fn platform_keys(&self) -> HashSet<PlatformKey> {
        self.platforms.iter().map(PlatformData::key).collect()
    }
}

impl ImageArtifactDetails {
    /// Read a ledger from disk
    pub async fn load(path: &Path) -> ImageBuilderResult<Self> {
        if !path.exists() {
            return Err(ImageBuilderError::PathNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            ImageBuilderError::io(format!("reading image info {}", path.display()), e)
        })?;

        Self::parse(&content).map_err(|e| ImageBuilderError::ImageInfoInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Read a ledger if the file exists, else start empty
    pub async fn load_or_default(path: &Path) -> ImageBuilderResult<Self> {
        if path.exists() {
            Self::load(path).await
        } else {
            debug!("No image info at {}, starting empty", path.display());
            Ok(Self::default())
        }
    }

    /// Parse a ledger from JSON. Blank content is an empty ledger.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content)
    }

    /// Serialize as pretty JSON with a trailing newline
    pub fn to_json(&self) -> ImageBuilderResult<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the ledger to disk, creating parent directories
    pub async fn save(&self, path: &Path) -> ImageBuilderResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                ImageBuilderError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        fs::write(path, self.to_json()?).await.map_err(|e| {
            ImageBuilderError::io(format!("writing image info {}", path.display()), e)
        })?;

        debug!("Wrote image info to {}", path.display());
        Ok(())
    }

    /// Skeleton ledger mirroring the manifest: every image keyed, every
    /// platform present with identity fields only
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let repos = manifest
            .repos
            .iter()
            .map(|repo| RepoData {
                repo: repo.name.clone(),
                images: repo
                    .images
                    .iter()
                    .map(|image| ImageData {
                        key: Some(image.key.clone()),
                        product_version: image.product_version.clone(),
                        manifest: None,
                        platforms: image
                            .platforms
                            .iter()
                            .map(|p| PlatformData::from_key(&p.key()))
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self { repos }
    }

    /// Attach canonical manifest identities to ledger images.
    ///
    /// An image matches a manifest image of the same repo and product version
    /// declaring every one of its platforms. Each manifest image is claimed at
    /// most once, so duplicated Dockerfiles pair up in declaration order.
    pub fn attach_manifest(&mut self, manifest: &Manifest) {
        for repo_data in &mut self.repos {
            let Some(repo) = manifest.repo(&repo_data.repo) else {
                continue;
            };
            let mut claimed: HashSet<&ImageKey> = HashSet::new();

            for image_data in &mut repo_data.images {
                let wanted = image_data.platform_keys();
                let found = repo.images.iter().find(|image| {
                    if claimed.contains(&image.key) || image.product_version != image_data.product_version {
                        return false;
                    }
                    let declared: HashSet<PlatformKey> =
                        image.platforms.iter().map(|p| p.key()).collect();
                    wanted.is_subset(&declared)
                });

                image_data.key = found.map(|image| {
                    claimed.insert(&image.key);
                    image.key.clone()
                });
            }
        }
    }

    pub fn repo(&self, name: &str) -> Option<&RepoData> {
        self.repos.iter().find(|r| r.repo == name)
    }

    /// Image entry with the given canonical key
    pub fn image(&self, key: &ImageKey) -> Option<&ImageData> {
        self.repo(&key.repo)?
            .images
            .iter()
            .find(|i| i.key.as_ref() == Some(key))
    }

    /// Prior build of a platform, looked up by image key then platform identity.
    ///
    /// Entries without build facts count as absent.
    pub fn find_platform(&self, image: &ImageKey, platform: &PlatformKey) -> Option<&PlatformData> {
        self.image(image)?
            .platforms
            .iter()
            .find(|p| &p.key() == platform && p.has_build_facts())
    }

    /// Get the image entry for a key, appending repo and image as needed
    pub fn image_mut_or_insert(
        &mut self,
        key: &ImageKey,
        product_version: Option<&str>,
    ) -> &mut ImageData {
        let repo_idx = match self.repos.iter().position(|r| r.repo == key.repo) {
            Some(idx) => idx,
            None => {
                self.repos.push(RepoData {
                    repo: key.repo.clone(),
                    images: Vec::new(),
                });
                self.repos.len() - 1
            }
        };

        let images = &mut self.repos[repo_idx].images;
        let image_idx = match images.iter().position(|i| i.key.as_ref() == Some(key)) {
            Some(idx) => idx,
            None => {
                images.push(ImageData {
                    key: Some(key.clone()),
                    product_version: product_version.map(str::to_string),
                    manifest: None,
                    platforms: Vec::new(),
                });
                images.len() - 1
            }
        };

        &mut images[image_idx]
    }
}

/// The `sha256:...` part of a digest, with any `repo@` prefix removed
pub fn digest_sha(digest: &str) -> &str {
    digest.rsplit_once('@').map(|(_, sha)| sha).unwrap_or(digest)
}

/// Whether two digests name the same content, ignoring repo prefixes
pub fn digests_equal(a: &str, b: &str) -> bool {
    digest_sha(a) == digest_sha(b)
}

/// Extract the commit SHA from `<repo-url>/blob/<sha>/<path>`
pub fn commit_sha_from_url(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("/blob/")?;
    let sha = rest.split('/').next()?;
    (!sha.is_empty()).then_some(sha)
}

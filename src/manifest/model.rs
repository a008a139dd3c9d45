//! Manifest parsing
//!
//! The manifest is a JSON document describing repos, the images in each repo
//! and the platforms each image is built for. Loading resolves `$(variable)`
//! references and assigns every image its canonical [`ImageKey`].

use crate::error::{ImageBuilderError, ImageBuilderResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Canonical identity of a manifest image: repo, product version and ordinal
/// among images of that repo sharing the same product version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey {
    pub repo: String,
    pub product_version: String,
    pub ordinal: usize,
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.repo, self.product_version, self.ordinal)
    }
}

/// Identity of a platform build: Dockerfile path, architecture, OS type and
/// OS version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformKey {
    pub dockerfile: String,
    pub architecture: String,
    pub os_type: String,
    pub os_version: String,
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{}/{})",
            self.dockerfile, self.os_type, self.os_version, self.architecture
        )
    }
}

// Raw manifest document as it appears on disk.

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    #[serde(default)]
    registry: Option<String>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
    #[serde(default)]
    repos: Vec<RepoDocument>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepoDocument {
    name: String,
    #[serde(default)]
    images: Vec<ImageDocument>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageDocument {
    #[serde(default)]
    product_version: Option<String>,
    #[serde(default)]
    shared_tags: BTreeMap<String, TagDocument>,
    #[serde(default)]
    platforms: Vec<PlatformDocument>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlatformDocument {
    dockerfile: String,
    os: String,
    #[serde(default)]
    os_version: String,
    #[serde(default = "default_architecture")]
    architecture: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    build_args: BTreeMap<String, String>,
    #[serde(default)]
    tags: BTreeMap<String, TagDocument>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct TagDocument {
    #[serde(default)]
    is_local: bool,
    #[serde(default)]
    syndication: Option<Syndication>,
}

fn default_architecture() -> String {
    "amd64".to_string()
}

/// Republishing target for a tag
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Syndication {
    /// Repo the tag is republished under
    pub repo: String,

    /// Tag names in the syndicated repo (defaults to the original tag name)
    #[serde(default)]
    pub destination_tags: Option<Vec<String>>,
}

impl Syndication {
    /// Destination tag names for a source tag
    pub fn destinations(&self, tag: &str) -> Vec<String> {
        match &self.destination_tags {
            Some(tags) if !tags.is_empty() => tags.clone(),
            _ => vec![tag.to_string()],
        }
    }
}

/// A declared tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    /// Local tags are applied to the built image but never pushed or recorded
    pub is_local: bool,
    pub syndication: Option<Syndication>,
}

/// A single platform build of an image
#[derive(Debug, Clone)]
pub struct Platform {
    /// Dockerfile path relative to the manifest directory
    pub dockerfile: String,
    pub os_type: String,
    pub os_version: String,
    pub architecture: String,
    pub variant: Option<String>,
    pub build_args: BTreeMap<String, String>,
    pub tags: Vec<Tag>,
}

impl Platform {
    /// Stable identity of this platform
    pub fn key(&self) -> PlatformKey {
        PlatformKey {
            dockerfile: self.dockerfile.clone(),
            architecture: self.architecture.clone(),
            os_type: self.os_type.clone(),
            os_version: self.os_version.clone(),
        }
    }

    /// Target platform as container engines spell it, e.g. `linux/arm64/v8`
    pub fn platform_spec(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}/{}/{}", self.os_type, self.architecture, variant),
            None => format!("{}/{}", self.os_type, self.architecture),
        }
    }

    /// Directory holding the Dockerfile, used as the build context
    pub fn context_dir(&self) -> &str {
        self.dockerfile
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or(".")
    }

    /// Non-local tag names, the ones recorded in image info
    pub fn simple_tags(&self) -> BTreeSet<String> {
        self.tags
            .iter()
            .filter(|t| !t.is_local)
            .map(|t| t.name.clone())
            .collect()
    }

    /// First non-local tag, falling back to the first tag of any kind
    pub fn primary_tag(&self) -> Option<&Tag> {
        self.tags
            .iter()
            .find(|t| !t.is_local)
            .or_else(|| self.tags.first())
    }
}

/// An image grouping platforms of one product version
#[derive(Debug, Clone)]
pub struct Image {
    pub key: ImageKey,
    pub product_version: Option<String>,
    pub shared_tags: Vec<Tag>,
    pub platforms: Vec<Platform>,
}

impl Image {
    /// Non-local shared tag names
    pub fn shared_tag_names(&self) -> BTreeSet<String> {
        self.shared_tags
            .iter()
            .filter(|t| !t.is_local)
            .map(|t| t.name.clone())
            .collect()
    }
}

/// A named collection of images
#[derive(Debug, Clone)]
pub struct Repo {
    pub name: String,
    pub images: Vec<Image>,
}

/// A loaded manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Registry the published images live in
    pub registry: Option<String>,

    /// Directory Dockerfile paths are relative to
    pub base_dir: PathBuf,

    pub repos: Vec<Repo>,
}

impl Manifest {
    /// Load and resolve a manifest from disk
    pub async fn load(path: &Path) -> ImageBuilderResult<Self> {
        if !path.exists() {
            return Err(ImageBuilderError::PathNotFound(path.to_path_buf()));
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ImageBuilderError::io(format!("reading manifest {}", path.display()), e)
        })?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::parse(&content, base_dir).map_err(|e| match e {
            ImageBuilderError::ManifestInvalid { reason, .. } => {
                ImageBuilderError::ManifestInvalid {
                    path: path.to_path_buf(),
                    reason,
                }
            }
            other => other,
        })
    }

    /// Parse a manifest from a JSON string
    pub fn parse(content: &str, base_dir: PathBuf) -> ImageBuilderResult<Self> {
        let doc: ManifestDocument =
            serde_json::from_str(content).map_err(|e| ImageBuilderError::ManifestInvalid {
                path: PathBuf::from("manifest.json"),
                reason: e.to_string(),
            })?;

        let vars = &doc.variables;
        let mut repos = Vec::with_capacity(doc.repos.len());

        for repo_doc in &doc.repos {
            let repo_name = substitute_variables(&repo_doc.name, vars)?;
            let mut ordinals: BTreeMap<String, usize> = BTreeMap::new();
            let mut images = Vec::with_capacity(repo_doc.images.len());

            for image_doc in &repo_doc.images {
                let product_version = image_doc
                    .product_version
                    .as_deref()
                    .map(|v| substitute_variables(v, vars))
                    .transpose()?;

                let version_key = product_version.clone().unwrap_or_default();
                let ordinal = ordinals.entry(version_key.clone()).or_insert(0);
                let key = ImageKey {
                    repo: repo_name.clone(),
                    product_version: version_key,
                    ordinal: *ordinal,
                };
                *ordinal += 1;

                let platforms = image_doc
                    .platforms
                    .iter()
                    .map(|p| resolve_platform(p, vars))
                    .collect::<ImageBuilderResult<Vec<_>>>()?;

                images.push(Image {
                    key,
                    product_version,
                    shared_tags: resolve_tags(&image_doc.shared_tags, vars)?,
                    platforms,
                });
            }

            repos.push(Repo {
                name: repo_name,
                images,
            });
        }

        Ok(Self {
            registry: doc.registry.filter(|r| !r.is_empty()),
            base_dir,
            repos,
        })
    }

    /// Look up a repo by name
    pub fn repo(&self, name: &str) -> Option<&Repo> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Look up an image by its canonical key
    pub fn image(&self, key: &ImageKey) -> Option<&Image> {
        self.repo(&key.repo)?.images.iter().find(|i| &i.key == key)
    }

    /// Repo name qualified with the manifest registry, as FROM lines use it
    pub fn qualified_repo(&self, repo: &str) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, repo),
            None => repo.to_string(),
        }
    }

    /// Iterate over every platform with its owning image, in declaration order
    pub fn platforms(&self) -> impl Iterator<Item = (&Image, &Platform)> {
        self.repos
            .iter()
            .flat_map(|r| r.images.iter())
            .flat_map(|i| i.platforms.iter().map(move |p| (i, p)))
    }
}

fn resolve_platform(
    doc: &PlatformDocument,
    vars: &BTreeMap<String, String>,
) -> ImageBuilderResult<Platform> {
    let build_args = doc
        .build_args
        .iter()
        .map(|(k, v)| Ok((k.clone(), substitute_variables(v, vars)?)))
        .collect::<ImageBuilderResult<BTreeMap<_, _>>>()?;

    Ok(Platform {
        dockerfile: normalize_dockerfile_path(&substitute_variables(&doc.dockerfile, vars)?),
        os_type: doc.os.to_ascii_lowercase(),
        os_version: substitute_variables(&doc.os_version, vars)?,
        architecture: doc.architecture.to_ascii_lowercase(),
        variant: doc.variant.clone(),
        build_args,
        tags: resolve_tags(&doc.tags, vars)?,
    })
}

fn resolve_tags(
    tags: &BTreeMap<String, TagDocument>,
    vars: &BTreeMap<String, String>,
) -> ImageBuilderResult<Vec<Tag>> {
    tags.iter()
        .map(|(name, doc)| {
            Ok(Tag {
                name: substitute_variables(name, vars)?,
                is_local: doc.is_local,
                syndication: doc.syndication.clone(),
            })
        })
        .collect()
}

/// Normalize a declared Dockerfile location to a forward-slash file path.
///
/// A path whose last segment does not name a Dockerfile is a directory, and the
/// file inside it is `Dockerfile`.
pub fn normalize_dockerfile_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches("./").trim_end_matches('/');
    let last = path.rsplit('/').next().unwrap_or(path);
    if last.contains("Dockerfile") {
        path.to_string()
    } else {
        format!("{}/Dockerfile", path)
    }
}

/// Replace `$(name)` references with manifest variable values
pub fn substitute_variables(
    value: &str,
    vars: &BTreeMap<String, String>,
) -> ImageBuilderResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find(')')
            .ok_or_else(|| ImageBuilderError::UnknownVariable(after.to_string()))?;
        let name = &after[..end];
        let resolved = vars
            .get(name)
            .ok_or_else(|| ImageBuilderError::UnknownVariable(name.to_string()))?;
        out.push_str(resolved);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Restricts which platforms an operation considers
#[derive(Debug, Clone, Default)]
pub struct PlatformFilter {
    /// Dockerfile path prefixes; empty matches every path
    pub paths: Vec<String>,
    pub os_type: Option<String>,
    pub architecture: Option<String>,
}

impl PlatformFilter {
    pub fn matches(&self, platform: &Platform) -> bool {
        let path_ok = self.paths.is_empty()
            || self.paths.iter().any(|prefix| {
                let prefix = prefix.trim_start_matches("./").trim_end_matches('/');
                platform.dockerfile == prefix
                    || platform.dockerfile.starts_with(&format!("{}/", prefix))
            });
        let os_ok = self
            .os_type
            .as_deref()
            .is_none_or(|os| os_type_matches(os, &platform.os_type));
        let arch_ok = self
            .architecture
            .as_deref()
            .is_none_or(|arch| arch.eq_ignore_ascii_case(&platform.architecture));
        path_ok && os_ok && arch_ok
    }
}

/// OS type predicate where `*` matches everything
pub fn os_type_matches(filter: &str, os_type: &str) -> bool {
    filter == "*" || filter.eq_ignore_ascii_case(os_type)
}

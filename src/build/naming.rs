//! Image reference naming
//!
//! Images are declared under the manifest registry but may be built into an
//! override registry under a repo prefix, and external base images may be
//! served from a mirror.

use crate::config::RegistryConfig;
use crate::manifest::Manifest;

/// Computes where images live for the current run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageNaming {
    manifest_registry: Option<String>,
    override_registry: Option<String>,
    repo_prefix: String,
    mirror_registry: Option<String>,
    mirror_repo_prefix: String,
}

impl ImageNaming {
    pub fn new(manifest: &Manifest, registry: &RegistryConfig) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        Self {
            manifest_registry: manifest.registry.clone(),
            override_registry: non_empty(&registry.override_registry),
            repo_prefix: registry.repo_prefix.clone().unwrap_or_default(),
            mirror_registry: non_empty(&registry.mirror_registry),
            mirror_repo_prefix: registry.mirror_repo_prefix.clone().unwrap_or_default(),
        }
    }

    /// Whether built images live somewhere other than their manifest name
    pub fn has_override(&self) -> bool {
        self.override_registry.is_some() || !self.repo_prefix.is_empty()
    }

    /// Repo images of `repo` are built and pushed to
    pub fn target_repo(&self, repo: &str) -> String {
        let name = format!("{}{}", self.repo_prefix, repo);
        match self
            .override_registry
            .as_ref()
            .or(self.manifest_registry.as_ref())
        {
            Some(registry) => format!("{}/{}", registry, name),
            None => name,
        }
    }

    pub fn target_ref(&self, repo: &str, tag: &str) -> String {
        format!("{}:{}", self.target_repo(repo), tag)
    }

    /// Repo as Dockerfiles refer to it
    pub fn canonical_repo(&self, repo: &str) -> String {
        match &self.manifest_registry {
            Some(registry) => format!("{}/{}", registry, repo),
            None => repo.to_string(),
        }
    }

    pub fn canonical_ref(&self, repo: &str, tag: &str) -> String {
        format!("{}:{}", self.canonical_repo(repo), tag)
    }

    /// Mirror location of an external image, if a mirror is configured
    pub fn mirror_ref(&self, reference: &str) -> Option<String> {
        let mirror = self.mirror_registry.as_ref()?;
        Some(format!(
            "{}/{}{}",
            mirror,
            self.mirror_repo_prefix,
            strip_registry(reference)
        ))
    }
}

/// Drop the registry host from a reference, if it names one
pub fn strip_registry(reference: &str) -> &str {
    match reference.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            rest
        }
        _ => reference,
    }
}

/// Tag part of a tag reference (`repo:tag`), if any
pub fn reference_tag(reference: &str) -> Option<&str> {
    if reference.contains('@') {
        return None;
    }
    reference
        .rsplit_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.contains('/'))
}

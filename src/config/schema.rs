//! Configuration schema for image-builder
//!
//! Configuration is stored at `~/.config/image-builder/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Registry location overrides
    pub registry: RegistryConfig,

    /// Build settings
    pub build: BuildConfig,

    /// Git settings
    pub git: GitConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Registry override and mirror settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry images are built into, replacing the manifest registry
    pub override_registry: Option<String>,

    /// Prefix prepended to every repo name (e.g. "build-staging/1234/")
    pub repo_prefix: Option<String>,

    /// Registry that mirrors external base images
    pub mirror_registry: Option<String>,

    /// Repo prefix used inside the mirror registry
    pub mirror_repo_prefix: Option<String>,
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Push built images and manifest lists
    pub push: bool,

    /// Skip pulling base images before the build
    pub skip_pulling: bool,

    /// Reuse prior build results when the identity is unchanged
    pub cache_enabled: bool,

    /// Container engine binary
    pub engine: String,

    /// Source repository URL used to build commit links
    pub source_repo_url: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            push: false,
            skip_pulling: false,
            cache_enabled: true,
            engine: "docker".to_string(),
            source_repo_url: None,
        }
    }
}

/// Git settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Git binary
    pub binary: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }
}

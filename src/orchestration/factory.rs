//! Collaborator factory
//!
//! Instantiates the CLI-backed collaborators named by the configuration.

use crate::config::Config;
use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::orchestration::docker::DockerEngine;
use crate::orchestration::git::GitSourceControl;
use crate::orchestration::registry::EngineRegistryClient;
use crate::orchestration::runtime::{ImageEngine, RegistryClient, SourceControl};

/// Supported engine CLIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Docker,
    Podman,
}

impl EngineKind {
    pub fn parse(name: &str) -> ImageBuilderResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(ImageBuilderError::UnsupportedEngine(other.to_string())),
        }
    }

    pub fn binary(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// Create the container engine named by `build.engine`
pub fn create_engine(config: &Config) -> ImageBuilderResult<Box<dyn ImageEngine>> {
    let kind = EngineKind::parse(&config.build.engine)?;
    Ok(Box::new(DockerEngine::new(kind.binary())))
}

/// Create the source control client
pub fn create_source_control(config: &Config) -> Box<dyn SourceControl> {
    Box::new(GitSourceControl::new(config.git.binary.clone()))
}

/// Create the registry client; digest queries go through the engine CLI
pub fn create_registry_client(config: &Config) -> ImageBuilderResult<Box<dyn RegistryClient>> {
    let kind = EngineKind::parse(&config.build.engine)?;
    Ok(Box::new(EngineRegistryClient::new(kind.binary())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_parse() {
        assert_eq!(EngineKind::parse("Docker").unwrap(), EngineKind::Docker);
        assert_eq!(EngineKind::parse("podman").unwrap().binary(), "podman");
        assert!(matches!(
            EngineKind::parse("containerd"),
            Err(ImageBuilderError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn create_engine_uses_configured_engine() {
        let mut config = Config::default();
        assert_eq!(create_engine(&config).unwrap().engine_name(), "Docker");

        config.build.engine = "podman".to_string();
        assert_eq!(create_engine(&config).unwrap().engine_name(), "Podman");

        config.build.engine = "nerdctl".to_string();
        assert!(create_engine(&config).is_err());
        assert!(create_registry_client(&config).is_err());
    }
}

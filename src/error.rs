//! Error types for image-builder
//!
//! All modules use `ImageBuilderResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for image-builder operations
pub type ImageBuilderResult<T> = Result<T, ImageBuilderError>;

/// All errors that can occur in image-builder
#[derive(Error, Debug)]
pub enum ImageBuilderError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Unknown manifest variable '{0}'")]
    UnknownVariable(String),

    #[error("Dockerfile not found for platform: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Invalid Dockerfile {path}: {reason}")]
    DockerfileInvalid { path: PathBuf, reason: String },

    #[error("Unsupported container engine: {0}")]
    UnsupportedEngine(String),

    #[error("Invalid image info {path}: {reason}")]
    ImageInfoInvalid { path: PathBuf, reason: String },

    // Consistency errors
    #[error("Build of {dockerfile} pulled a base image although all pulls happen before the build")]
    UnexpectedPull { dockerfile: String },

    #[error("Image info source folder not found: {0}")]
    MergeSourceMissing(PathBuf),

    #[error("No image info files found in {0}")]
    MergeSourceEmpty(PathBuf),

    // External collaborator errors
    #[error("Failed to look up digest for {image}: {reason}")]
    DigestLookup { image: String, reason: String },

    #[error("Failed to look up commit for {path}: {reason}")]
    CommitLookup { path: String, reason: String },

    #[error("Image pull failed: {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Image build failed for {dockerfile}:\n{output}")]
    ImageBuild { dockerfile: String, output: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImageBuilderError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Consistency errors mean the inputs are misconfigured rather than that
    /// there is simply nothing to do. CI keys off this distinction.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedPull { .. } | Self::MergeSourceMissing(_) | Self::MergeSourceEmpty(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnexpectedPull { .. } => {
                Some("Pull base images before building, or pass --skip-pulling")
            }
            Self::MergeSourceEmpty(_) => Some("Check that the build shards published image info"),
            Self::UnknownVariable(_) => Some("Declare the variable under \"variables\" in the manifest"),
            Self::DockerfileNotFound(_) => Some("Check the manifest path and the source checkout"),
            Self::UnsupportedEngine(_) => Some("Set build.engine to \"docker\" or \"podman\""),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ImageBuilderError::UnexpectedPull {
            dockerfile: "src/runtime/amd64".to_string(),
        };
        assert!(err.to_string().contains("src/runtime/amd64"));
    }

    #[test]
    fn error_hint() {
        let err = ImageBuilderError::MergeSourceEmpty(PathBuf::from("/tmp/infos"));
        assert_eq!(
            err.hint(),
            Some("Check that the build shards published image info")
        );
        assert_eq!(ImageBuilderError::Internal("x".into()).hint(), None);
    }

    #[test]
    fn error_consistency() {
        assert!(ImageBuilderError::MergeSourceMissing(PathBuf::from("x")).is_consistency());
        assert!(!ImageBuilderError::PathNotFound(PathBuf::from("x")).is_consistency());
    }
}

//! Git CLI source control

use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::orchestration::runtime::SourceControl;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Commit lookups through `git log`
pub struct GitSourceControl {
    binary: String,
}

impl GitSourceControl {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl SourceControl for GitSourceControl {
    async fn get_commit_sha(&self, path: &Path) -> ImageBuilderResult<String> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        debug!("Looking up last commit of {}", path.display());

        let output = Command::new(&self.binary)
            .arg("-C")
            .arg(dir)
            .args(["log", "-1", "--format=%H", "--", &file])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ImageBuilderError::command_failed(format!("{} log", self.binary), e))?;

        if !output.status.success() {
            return Err(ImageBuilderError::CommitLookup {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() {
            return Err(ImageBuilderError::CommitLookup {
                path: path.display().to_string(),
                reason: "no commit touches this path".to_string(),
            });
        }

        Ok(sha)
    }
}

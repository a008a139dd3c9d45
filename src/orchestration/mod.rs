//! Orchestration of external collaborators
//!
//! The container engine, source control and registry sit behind traits:
//! - `docker` / `podman` CLI for images
//! - `git` CLI for commits
//! - `docker buildx imagetools` for registry digests

mod docker;
mod factory;
#[cfg(test)]
pub(crate) mod fake;
mod git;
mod registry;
mod runtime;

pub use docker::DockerEngine;
pub use factory::{create_engine, create_registry_client, create_source_control, EngineKind};
pub use git::GitSourceControl;
pub use registry::EngineRegistryClient;
pub use runtime::{BuildRequest, ImageEngine, RegistryClient, SourceControl};

use crate::error::{ImageBuilderError, ImageBuilderResult};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in build error messages.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of build output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `BUILD_ERROR_TAIL_LINES`
/// lines.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > BUILD_ERROR_TAIL_LINES {
        lines[total - BUILD_ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines. This is a standalone async function
/// (not behind `async_trait`) to avoid lifetime issues with the `dyn Fn`
/// callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> ImageBuilderResult<Vec<String>> {
    let (Some(stderr), Some(stdout)) = (child.stderr.take(), child.stdout.take()) else {
        return Err(ImageBuilderError::Internal(
            "child process output is not piped".to_string(),
        ));
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut all_output = Vec::new();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    Ok(all_output)
}

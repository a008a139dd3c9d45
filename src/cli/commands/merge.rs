//! Merge command - fold sharded image info files into one

use crate::cli::args::MergeArgs;
use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::ledger::{merge, ImageArtifactDetails, MergeOptions};
use crate::manifest::Manifest;
use crate::ui::{self, UiContext};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Execute the merge-image-info command
pub async fn execute(args: MergeArgs) -> ImageBuilderResult<()> {
    let ctx = UiContext::detect();

    let manifest = match &args.manifest {
        Some(path) => Some(Manifest::load(path).await?),
        None => None,
    };

    let initial = if args.initial {
        ImageArtifactDetails::load_or_default(&args.destination).await?
    } else {
        ImageArtifactDetails::default()
    };

    let files = image_info_files(&args.source_dir, &args.destination).await?;
    let options = MergeOptions {
        replace_tags: args.replace_tags,
    };
    let merged = merge_files(&files, initial, manifest.as_ref(), options).await?;

    merged.save(&args.destination).await?;

    ui::outro_success(
        &ctx,
        &format!(
            "Merged {} image info file(s) into {}",
            files.len(),
            args.destination.display()
        ),
    );
    Ok(())
}

/// `*.json` files of the source folder sorted by file name, skipping the
/// destination should it live there
async fn image_info_files(source_dir: &Path, destination: &Path) -> ImageBuilderResult<Vec<PathBuf>> {
    if !source_dir.is_dir() {
        return Err(ImageBuilderError::MergeSourceMissing(source_dir.to_path_buf()));
    }

    let mut entries = fs::read_dir(source_dir).await.map_err(|e| {
        ImageBuilderError::io(format!("reading directory {}", source_dir.display()), e)
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        ImageBuilderError::io(format!("reading directory {}", source_dir.display()), e)
    })? {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json && path.is_file() && path != destination {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(ImageBuilderError::MergeSourceEmpty(source_dir.to_path_buf()));
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Merge the files in order into `target`
async fn merge_files(
    files: &[PathBuf],
    mut target: ImageArtifactDetails,
    manifest: Option<&Manifest>,
    options: MergeOptions,
) -> ImageBuilderResult<ImageArtifactDetails> {
    if let Some(manifest) = manifest {
        target.attach_manifest(manifest);
    }

    for path in files {
        let mut source = ImageArtifactDetails::load(path).await?;
        if let Some(manifest) = manifest {
            source.attach_manifest(manifest);
        }
        debug!("Merging {}", path.display());
        merge(&source, &mut target, options);
    }

    info!("Merged {} image info file(s)", files.len());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shard(arch: &str, tags: &[&str]) -> String {
        let tags: Vec<String> = tags.iter().map(|t| format!("\"{}\"", t)).collect();
        format!(
            r#"{{ "repos": [ {{ "repo": "dotnet/runtime", "images": [ {{ "productVersion": "6.0",
              "platforms": [ {{ "dockerfile": "runtime/{arch}/Dockerfile", "architecture": "{arch}",
                "osType": "linux", "osVersion": "bullseye-slim",
                "digest": "dotnet/runtime@sha256:{arch}", "simpleTags": [{tags}] }} ] }} ] }} ] }}"#,
            arch = arch,
            tags = tags.join(", ")
        )
    }

    #[tokio::test]
    async fn files_are_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.json"), "{}").unwrap();
        std::fs::write(temp.path().join("a.json"), "{}").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "x").unwrap();
        let destination = temp.path().join("merged.json");
        std::fs::write(&destination, "{}").unwrap();

        let files = image_info_files(temp.path(), &destination).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[tokio::test]
    async fn missing_and_empty_sources_are_consistency_errors() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("out.json");

        let err = image_info_files(&temp.path().join("absent"), &destination)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageBuilderError::MergeSourceMissing(_)));
        assert!(err.is_consistency());

        let err = image_info_files(temp.path(), &destination).await.unwrap_err();
        assert!(matches!(err, ImageBuilderError::MergeSourceEmpty(_)));
    }

    #[tokio::test]
    async fn shards_merge_into_one_image() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("amd64.json"), shard("amd64", &["6.0-amd64"])).unwrap();
        std::fs::write(temp.path().join("arm64.json"), shard("arm64", &["6.0-arm64"])).unwrap();

        let files = image_info_files(temp.path(), &temp.path().join("out.json"))
            .await
            .unwrap();
        let merged = merge_files(&files, ImageArtifactDetails::default(), None, MergeOptions::default())
            .await
            .unwrap();

        let repo = merged.repo("dotnet/runtime").unwrap();
        assert_eq!(repo.images.len(), 1);
        let archs: Vec<&str> = repo.images[0]
            .platforms
            .iter()
            .map(|p| p.architecture.as_str())
            .collect();
        assert_eq!(archs, vec!["amd64", "arm64"]);
    }

    #[tokio::test]
    async fn initial_destination_tags_follow_policy() {
        let temp = TempDir::new().unwrap();
        let shards = temp.path().join("shards");
        std::fs::create_dir(&shards).unwrap();
        std::fs::write(shards.join("amd64.json"), shard("amd64", &["tag1", "tag3"])).unwrap();
        let files = image_info_files(&shards, &temp.path().join("out.json"))
            .await
            .unwrap();

        let existing = ImageArtifactDetails::parse(&shard("amd64", &["tag1", "tag2"])).unwrap();
        let tags = |details: &ImageArtifactDetails| -> Vec<String> {
            details.repos[0].images[0].platforms[0]
                .simple_tags
                .iter()
                .cloned()
                .collect()
        };

        let union = merge_files(&files, existing.clone(), None, MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(tags(&union), vec!["tag1", "tag2", "tag3"]);

        let replaced = merge_files(&files, existing, None, MergeOptions { replace_tags: true })
            .await
            .unwrap();
        assert_eq!(tags(&replaced), vec!["tag1", "tag3"]);
    }
}

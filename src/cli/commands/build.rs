//! Build command - build the manifest's images and record image info

use crate::build::{BuildEngine, BuildOptions, BuildReport, ImageNaming};
use crate::cli::args::BuildArgs;
use crate::config::{Config, RegistryConfig};
use crate::error::ImageBuilderResult;
use crate::ledger::{self, ImageArtifactDetails};
use crate::manifest::{Manifest, ManifestGraph};
use crate::orchestration::{create_engine, create_registry_client, create_source_control};
use crate::ui::{self, BuildProgress, TaskSpinner, UiContext};
use std::sync::Arc;
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> ImageBuilderResult<()> {
    let ctx = UiContext::detect();

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Loading manifest {}...", args.manifest.display()));
    let manifest = Manifest::load(&args.manifest).await?;
    let graph = match ManifestGraph::load(&manifest).await {
        Ok(graph) => graph,
        Err(e) => {
            spinner.stop_error("Failed to resolve Dockerfiles");
            return Err(e);
        }
    };
    spinner.stop(&format!("Loaded {} platform(s)", graph.nodes().len()));

    let persisted = match &args.image_info {
        Some(path) => ImageArtifactDetails::load_or_default(path).await?,
        None => ImageArtifactDetails::default(),
    };
    let prior = ledger::reconcile(&manifest, &persisted);

    let engine = create_engine(config)?;
    let source_control = create_source_control(config);
    let registry = create_registry_client(config)?;
    let naming = ImageNaming::new(&manifest, &registry_config(&args, config));
    let output = args.output.clone();
    let options = build_options(args, config);

    let progress = Arc::new(BuildProgress::new(&ctx, "Building images"));
    let handler = {
        let progress = Arc::clone(&progress);
        Box::new(move |line: String| {
            debug!("{}", line);
            progress.on_line(&line);
        })
    };

    let result = BuildEngine::new(
        engine.as_ref(),
        source_control.as_ref(),
        registry.as_ref(),
        naming,
        options,
    )
    .with_output_handler(handler)
    .run(&manifest, &graph, &prior)
    .await;
    progress.finish();
    let report = result?;

    print_report(&ctx, &report);

    if let Some(path) = output {
        report.image_info.save(&path).await?;
        ui::step_ok_detail(&ctx, "Image info written", &path.display().to_string());
    }

    Ok(())
}

/// Config registry settings with command-line overrides applied
fn registry_config(args: &BuildArgs, config: &Config) -> RegistryConfig {
    let mut registry = config.registry.clone();
    if args.registry_override.is_some() {
        registry.override_registry = args.registry_override.clone();
    }
    if args.repo_prefix.is_some() {
        registry.repo_prefix = args.repo_prefix.clone();
    }
    if args.mirror_registry.is_some() {
        registry.mirror_registry = args.mirror_registry.clone();
    }
    registry
}

/// Config build settings with command-line flags applied
fn build_options(args: BuildArgs, config: &Config) -> BuildOptions {
    let mut options = BuildOptions::from_config(&config.build);
    options.push |= args.push;
    options.skip_pulling |= args.skip_pulling;
    options.cache_enabled &= !args.no_cache;
    if args.source_repo_url.is_some() {
        options.source_repo_url = args.source_repo_url;
    }
    options.filter = args.filter.into();
    options
}

fn print_report(ctx: &UiContext, report: &BuildReport) {
    ui::section(ctx, "Platforms");
    for outcome in &report.outcomes {
        let label = format!(
            "{} {} ({})",
            outcome.repo, outcome.key.dockerfile, outcome.key.architecture
        );
        if outcome.decision.use_cache() {
            ui::step_ok_detail(ctx, &label, &outcome.decision.to_string());
        } else {
            ui::step_info(ctx, &format!("{} {}", label, outcome.decision));
        }
    }

    if report.outcomes.is_empty() {
        ui::outro_warn(ctx, "No platforms matched the filter");
    } else {
        ui::outro_success(
            ctx,
            &format!("Built {}, reused {}", report.built(), report.cached()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{Cli, Commands};
    use clap::Parser;

    fn build_args(extra: &[&str]) -> BuildArgs {
        let mut argv = vec!["image-builder", "build"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Build(args) => args,
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn flags_override_config() {
        let mut config = Config::default();
        config.build.source_repo_url = Some("https://example.com/config".into());
        config.registry.mirror_registry = Some("mirror.io".into());

        let args = build_args(&[
            "--no-cache",
            "--push",
            "--registry-override",
            "myacr.io",
            "--source-repo-url",
            "https://example.com/flag",
            "--os-type",
            "linux",
        ]);
        let registry = registry_config(&args, &config);
        assert_eq!(registry.override_registry.as_deref(), Some("myacr.io"));
        assert_eq!(registry.mirror_registry.as_deref(), Some("mirror.io"));

        let options = build_options(args, &config);
        assert!(options.push);
        assert!(!options.cache_enabled);
        assert!(!options.skip_pulling);
        assert_eq!(options.source_repo_url.as_deref(), Some("https://example.com/flag"));
        assert_eq!(options.filter.os_type.as_deref(), Some("linux"));
    }

    #[test]
    fn config_applies_without_flags() {
        let mut config = Config::default();
        config.build.push = true;
        config.build.source_repo_url = Some("https://example.com/config".into());

        let options = build_options(build_args(&[]), &config);
        assert!(options.push);
        assert!(options.cache_enabled);
        assert_eq!(options.source_repo_url.as_deref(), Some("https://example.com/config"));
    }
}

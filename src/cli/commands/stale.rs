//! Get-stale-images command - list Dockerfiles whose base images changed

use crate::cli::args::StaleImagesArgs;
use crate::config::Config;
use crate::error::{ImageBuilderError, ImageBuilderResult};
use crate::orchestration::create_registry_client;
use crate::staleness::{load_subscriptions, StalenessResolver, SubscriptionImagePaths};
use crate::ui::{self, TaskSpinner, UiContext};
use tokio::fs;

/// Execute the get-stale-images command
pub async fn execute(args: StaleImagesArgs, config: &Config) -> ImageBuilderResult<()> {
    let ctx = UiContext::detect();

    let subscriptions = load_subscriptions(&args.subscriptions).await?;
    let registry = create_registry_client(config)?;
    let resolver = StalenessResolver::new(registry.as_ref());

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!(
        "Checking {} subscription(s) for stale images...",
        subscriptions.len()
    ));

    let results = match resolver
        .get_stale_images(
            &subscriptions,
            &args.os_type,
            args.image_info.as_deref(),
            &args.filter.into(),
        )
        .await
    {
        Ok(results) => results,
        Err(e) => {
            spinner.stop_error("Stale image check failed");
            return Err(e);
        }
    };
    spinner.stop(&summary(&results));

    let mut json = serde_json::to_string_pretty(&results)?;
    json.push('\n');

    match &args.output {
        Some(path) => {
            fs::write(path, json).await.map_err(|e| {
                ImageBuilderError::io(format!("writing stale images to {}", path.display()), e)
            })?;
            ui::step_ok_detail(&ctx, "Stale images written", &path.display().to_string());
        }
        None => print!("{}", json),
    }

    Ok(())
}

fn summary(results: &[SubscriptionImagePaths]) -> String {
    let stale: usize = results.iter().map(|r| r.image_paths.len()).sum();
    format!(
        "{} stale Dockerfile(s) across {} subscription(s)",
        stale,
        results.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_paths() {
        let results = vec![
            SubscriptionImagePaths {
                subscription: "dotnet-docker-main".into(),
                image_paths: vec!["src/runtime/6.0".into(), "src/aspnet/6.0".into()],
            },
            SubscriptionImagePaths {
                subscription: "dotnet-docker-nightly".into(),
                image_paths: Vec::new(),
            },
        ];
        assert_eq!(summary(&results), "2 stale Dockerfile(s) across 2 subscription(s)");
    }
}

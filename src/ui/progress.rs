//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ";

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = ProgressBar::new_spinner();
            if let Ok(spinner_style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
                spinner.set_style(spinner_style.tick_chars(TICK_CHARS));
            }
            spinner.set_message(message.to_string());
            spinner.enable_steady_tick(Duration::from_millis(120));
            self.spinner = Some(spinner);
        } else {
            eprintln!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
            eprintln!("{} {}", style("✓").green(), message);
        } else {
            eprintln!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
            eprintln!("{} {}", style("✗").red(), message);
        } else {
            eprintln!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Progress display for image builds.
///
/// Follows `Step N/M` lines from the engine's build output; in CI only the
/// step lines are echoed.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(0);
            if let Ok(bar_style) = ProgressStyle::with_template(
                "  {spinner:.cyan} {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
            ) {
                bar.set_style(bar_style.tick_chars(TICK_CHARS).progress_chars("━╸─"));
            }
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            eprintln!("{}...", label);
            None
        };
        Self { bar }
    }

    /// Process a build output line
    pub fn on_line(&self, line: &str) {
        if let Some((n, total, instruction)) = parse_step_line(line) {
            match &self.bar {
                Some(bar) => {
                    bar.set_length(total);
                    bar.set_position(n);
                    bar.set_message(instruction.to_string());
                }
                None => eprintln!("  Step {}/{}: {}", n, total, instruction),
            }
        } else if let Some(bar) = &self.bar {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !is_build_noise(trimmed) {
                let display: String = if trimmed.chars().count() > 60 {
                    format!("{}...", trimmed.chars().take(57).collect::<String>())
                } else {
                    trimmed.to_string()
                };
                bar.set_message(display);
            }
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

/// Engine bookkeeping lines not worth displaying
fn is_build_noise(line: &str) -> bool {
    line.starts_with("--->")
        || line.starts_with("-->")
        || line.starts_with("Removing intermediate")
        || line.starts_with("COMMIT")
}

/// Parse `Step N/M : INSTRUCTION` (Docker) or `STEP N/M: INSTRUCTION` (Podman)
fn parse_step_line(line: &str) -> Option<(u64, u64, &str)> {
    let rest = line
        .strip_prefix("Step ")
        .or_else(|| line.strip_prefix("STEP "))?;
    let slash = rest.find('/')?;
    let colon = rest.find(':')?;
    if colon <= slash {
        return None;
    }
    let n: u64 = rest[..slash].trim().parse().ok()?;
    let total: u64 = rest[slash + 1..colon].trim().parse().ok()?;
    let instruction = rest[colon + 1..].trim();
    Some((n, total, instruction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_non_interactive() {
        let ctx = UiContext::non_interactive();
        let mut spinner = TaskSpinner::new(&ctx);
        spinner.start("Loading manifest...");
        spinner.stop("Done");
        spinner.start("Resolving...");
        spinner.stop_error("Failed");
    }

    #[test]
    fn parse_docker_step_line() {
        let (n, m, instr) = parse_step_line("Step 3/13 : RUN apt-get update").unwrap();
        assert_eq!((n, m), (3, 13));
        assert_eq!(instr, "RUN apt-get update");
    }

    #[test]
    fn parse_podman_step_line() {
        let (n, m, instr) =
            parse_step_line("STEP 1/8: FROM mcr.microsoft.com/dotnet/runtime-deps:6.0").unwrap();
        assert_eq!((n, m), (1, 8));
        assert_eq!(instr, "FROM mcr.microsoft.com/dotnet/runtime-deps:6.0");
    }

    #[test]
    fn parse_step_line_not_a_step() {
        assert!(parse_step_line("---> abc123def").is_none());
        assert!(parse_step_line("Step one: nothing").is_none());
        assert!(parse_step_line("").is_none());
    }

    #[test]
    fn build_progress_non_interactive() {
        let ctx = UiContext::non_interactive();
        let progress = BuildProgress::new(&ctx, "Building images");
        progress.on_line("Step 1/5 : FROM debian:bullseye-slim");
        progress.on_line("---> abc123");
        progress.finish();
    }

    #[test]
    fn is_build_noise_filters_engine_internals() {
        assert!(is_build_noise("---> abc123def"));
        assert!(is_build_noise("--> Using cache abc123"));
        assert!(is_build_noise("Removing intermediate container abc123"));
        assert!(!is_build_noise("Setting up libc6"));
        assert!(!is_build_noise(""));
    }
}

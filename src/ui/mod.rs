//! Terminal output
//!
//! Spinners and build progress in an interactive terminal, plain prefixed
//! lines in CI. Everything goes to stderr so command results on stdout stay
//! machine readable.
//!
//! # Example
//!
//! ```rust,ignore
//! use image_builder::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Loading manifest...");
//! // ... do work ...
//! spinner.stop("Loaded 12 platforms");
//!
//! ui::step_ok(&ctx, "dotnet/runtime 6.0-amd64");
//! ui::outro_success(&ctx, "Built 3, reused 9");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    key_value, outro_success, outro_warn, section, step_info, step_ok, step_ok_detail, step_warn,
};
pub use progress::{BuildProgress, TaskSpinner};

//! image-builder - multi-platform container image builds
//!
//! Builds the platforms of a declarative image manifest in dependency
//! order, reuses prior builds whose inputs are unchanged, detects images
//! made stale by base image updates and merges sharded build results.

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod orchestration;
pub mod staleness;
pub mod ui;

pub use error::{ImageBuilderError, ImageBuilderResult};

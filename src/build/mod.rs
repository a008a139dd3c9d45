//! Image builds
//!
//! Cache decisions, reference naming and the engine that drives the container
//! engine through a manifest graph.

pub mod decision;
pub mod engine;
pub mod naming;

pub use decision::{evaluate, CacheDecision, MissReason, PlatformIdentity};
pub use engine::{BuildEngine, BuildOptions, BuildReport, PlatformOutcome};
pub use naming::ImageNaming;

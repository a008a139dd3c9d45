//! Manifest graph model
//!
//! Loads the declarative repo → image → platform description and resolves
//! the FROM references of every platform's Dockerfile into graph edges.

pub mod dockerfile;
pub mod graph;
pub mod model;

pub use graph::{ManifestGraph, NodeId, PlatformNode, ResolvedRef};
pub use model::{
    os_type_matches, Image, ImageKey, Manifest, Platform, PlatformFilter, PlatformKey, Repo,
    Syndication, Tag,
};

//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// image-builder - build, cache and track container images
///
/// Builds the platforms of an image manifest in dependency order, reusing
/// prior builds whose inputs are unchanged, and records the results as
/// image info.
#[derive(Parser, Debug)]
#[command(name = "image-builder")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "IMAGE_BUILDER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the manifest's images, reusing unchanged prior builds
    Build(BuildArgs),

    /// List Dockerfiles needing a rebuild because a base image changed
    GetStaleImages(StaleImagesArgs),

    /// Merge sharded image info files into one
    MergeImageInfo(MergeArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Platform selection shared by build and staleness commands
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only consider Dockerfiles under these paths (repeatable)
    #[arg(long = "path")]
    pub paths: Vec<String>,

    /// Only consider platforms of this OS type
    #[arg(long)]
    pub os_type: Option<String>,

    /// Only consider platforms of this architecture
    #[arg(long)]
    pub architecture: Option<String>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Manifest file
    #[arg(short, long, default_value = "manifest.json")]
    pub manifest: PathBuf,

    /// Prior image info consulted for cache decisions
    #[arg(long)]
    pub image_info: Option<PathBuf>,

    /// Where to write image info for the platforms processed
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Push images and publish manifest lists
    #[arg(long)]
    pub push: bool,

    /// Base images are already present locally
    #[arg(long)]
    pub skip_pulling: bool,

    /// Always build, ignoring prior image info
    #[arg(long)]
    pub no_cache: bool,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Registry to build into instead of the manifest registry
    #[arg(long)]
    pub registry_override: Option<String>,

    /// Prefix prepended to repo names
    #[arg(long)]
    pub repo_prefix: Option<String>,

    /// Registry mirroring external base images
    #[arg(long)]
    pub mirror_registry: Option<String>,

    /// Repository URL commit links point into
    #[arg(long)]
    pub source_repo_url: Option<String>,
}

/// Arguments for the get-stale-images command
#[derive(Parser, Debug)]
pub struct StaleImagesArgs {
    /// Subscriptions file
    #[arg(short, long)]
    pub subscriptions: PathBuf,

    /// Only check subscriptions of this OS type
    #[arg(long, default_value = "*")]
    pub os_type: String,

    /// Prior image info for subscriptions not naming their own
    #[arg(long)]
    pub image_info: Option<PathBuf>,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the merge-image-info command
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Folder holding the image info files to merge
    pub source_dir: PathBuf,

    /// Merged image info file
    pub destination: PathBuf,

    /// Take tag sets from the sources instead of unioning them
    #[arg(long)]
    pub replace_tags: bool,

    /// Manifest used to match images by identity
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Merge into the existing destination instead of an empty ledger
    #[arg(long)]
    pub initial: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

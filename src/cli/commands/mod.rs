//! CLI command implementations

pub mod build;
pub mod completions;
pub mod config;
pub mod merge;
pub mod stale;

pub use build::execute as build;
pub use completions::execute as completions;
pub use config::execute as config;
pub use merge::execute as merge;
pub use stale::execute as stale;

use crate::cli::args::FilterArgs;
use crate::manifest::PlatformFilter;

impl From<FilterArgs> for PlatformFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            paths: args.paths,
            os_type: args.os_type,
            architecture: args.architecture,
        }
    }
}

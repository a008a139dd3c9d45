//! Cache decisions
//!
//! Compares the identity a platform would be built with now against what the
//! prior image info recorded for it.

use crate::ledger::{digests_equal, PlatformData};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Inputs that determine a platform's build result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    /// Digest of the final-stage base image; `None` for scratch
    pub base_digest: Option<String>,
    /// Latest commit touching the Dockerfile
    pub commit_sha: String,
    pub build_args: BTreeMap<String, String>,
}

/// Why a prior build cannot be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    NoPriorEntry,
    BaseImageChanged,
    CommitChanged,
    BuildArgsChanged,
    /// Declared tags the prior build was never published under
    NewTags(Vec<String>),
    CachingDisabled,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPriorEntry => write!(f, "no prior build"),
            Self::BaseImageChanged => write!(f, "base image changed"),
            Self::CommitChanged => write!(f, "Dockerfile changed"),
            Self::BuildArgsChanged => write!(f, "build arguments changed"),
            Self::NewTags(tags) => write!(f, "new tags: {}", tags.join(", ")),
            Self::CachingDisabled => write!(f, "caching disabled"),
        }
    }
}

/// Outcome of comparing a fresh identity with the prior build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// Reuse the image with this digest
    Hit {
        digest: String,
        /// Reused because a platform sharing the Dockerfile hit
        inferred: bool,
    },
    Miss(MissReason),
}

impl CacheDecision {
    pub fn use_cache(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }

    pub fn effective_digest(&self) -> Option<&str> {
        match self {
            Self::Hit { digest, .. } => Some(digest),
            Self::Miss(_) => None,
        }
    }
}

impl fmt::Display for CacheDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit { inferred: false, .. } => write!(f, "cached"),
            Self::Hit { inferred: true, .. } => write!(f, "cached (shared Dockerfile)"),
            Self::Miss(reason) => write!(f, "built ({})", reason),
        }
    }
}

/// Decide whether the prior build of a platform can be reused
pub fn evaluate(
    identity: &PlatformIdentity,
    declared_tags: &BTreeSet<String>,
    prior: Option<&PlatformData>,
) -> CacheDecision {
    let Some(prior) = prior else {
        return CacheDecision::Miss(MissReason::NoPriorEntry);
    };
    let Some(digest) = prior.digest.as_ref() else {
        return CacheDecision::Miss(MissReason::NoPriorEntry);
    };

    let same_base = match (identity.base_digest.as_deref(), prior.base_image_digest.as_deref()) {
        (Some(fresh), Some(recorded)) => digests_equal(fresh, recorded),
        (None, None) => true,
        _ => false,
    };
    if !same_base {
        return CacheDecision::Miss(MissReason::BaseImageChanged);
    }

    if prior.commit_sha() != Some(identity.commit_sha.as_str()) {
        return CacheDecision::Miss(MissReason::CommitChanged);
    }

    if prior.build_args != identity.build_args {
        return CacheDecision::Miss(MissReason::BuildArgsChanged);
    }

    let new_tags: Vec<String> = declared_tags
        .difference(&prior.simple_tags)
        .cloned()
        .collect();
    if !new_tags.is_empty() {
        return CacheDecision::Miss(MissReason::NewTags(new_tags));
    }

    CacheDecision::Hit {
        digest: digest.clone(),
        inferred: false,
    }
}

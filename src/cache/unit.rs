//! Build unit keys
//!
//! Platforms built from the same Dockerfile with the same build arguments on
//! top of the same base image produce the same image. They form one build
//! unit, addressed by a hash of those inputs.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Repository used for the local tag of a build unit
const UNIT_REPO: &str = "image-builder-unit";

/// Content-addressed key of a build unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey(String);

impl UnitKey {
    /// Hash the unit inputs. Build args are ordered by name, so declaration
    /// order does not matter.
    pub fn new(
        dockerfile: &str,
        build_args: &BTreeMap<String, String>,
        base_digest: Option<&str>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(dockerfile.as_bytes());
        hasher.update([0]);
        for (name, value) in build_args {
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        hasher.update(base_digest.unwrap_or("").as_bytes());
        let result = hasher.finalize();

        // First 12 hex characters
        Self(hex::encode(&result[..6]))
    }

    /// Local-only tag the unit's built image carries, so later members can
    /// be tagged from it
    pub fn local_tag(&self) -> String {
        format!("{}:{}", UNIT_REPO, self.0)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

use std::fmt;

use semver::{BuildMetadata, Prerelease, Version};

use crate::error::{GraphError, Result};

/// Version every graph starts from when it has none stored.
pub const NO_VERSION: &str = "0.0.0";

/// Application or graph version with pre-release and build suffixes
/// stripped, so `1.2.0-SNAPSHOT` and `1.2.0` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppVersion(Version);

impl AppVersion {
    /// Parses `major.minor.patch`, ignoring pre-release and build suffixes.
    pub fn parse(input: &str) -> Result<Self> {
        let mut version = Version::parse(input.trim()).map_err(|source| GraphError::Version {
            input: input.to_owned(),
            source,
        })?;
        version.pre = Prerelease::EMPTY;
        version.build = BuildMetadata::EMPTY;
        Ok(Self(version))
    }

    /// The `0.0.0` version of a graph that was never versioned.
    pub fn none() -> Self {
        Self(Version::new(0, 0, 0))
    }

    /// Underlying semantic version.
    pub fn as_semver(&self) -> &Version {
        &self.0
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

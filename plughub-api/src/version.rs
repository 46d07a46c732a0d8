//! Semantic versions of units
//!
//! Versions gate hot swaps: a unit only replaces another unit with the
//! same identity when its version is strictly greater.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A `major.minor.patch` version, ordered by numeric precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// Errors produced while parsing a version string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("Empty version string")]
    Empty,

    #[error("Invalid version component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },

    #[error("Too many version components in '{0}' (expected at most 3)")]
    TooManyComponents(String),
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns true if `self` takes precedence over `other`
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    /// Accepts `1`, `1.2`, `1.2.3` and an optional leading `v`.
    /// Missing components default to zero.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let mut parts = [0u64; 3];
        for (index, component) in body.split('.').enumerate() {
            if index >= parts.len() {
                return Err(VersionParseError::TooManyComponents(input.to_string()));
            }
            parts[index] =
                component
                    .parse::<u64>()
                    .map_err(|_| VersionParseError::InvalidComponent {
                        input: input.to_string(),
                        component: component.to_string(),
                    })?;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl TryFrom<&str> for Version {
    type Error = VersionParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

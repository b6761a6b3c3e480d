//! Chart versions and version ranges
//!
//! Application specs reference a chart either by an exact version (`1.2.3`,
//! `v2.0`) or by a range (`^1.2`, `>=1.0, <2.0`). Exact versions are parsed
//! leniently: a leading `v` is accepted and missing minor/patch components
//! default to zero.

use crate::error::{AnyAppError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An exact chart version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecificVersion(semver::Version);

impl SpecificVersion {
    /// Parse a version, accepting `v1`, `1.2` and full semantic versions.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if let Ok(version) = semver::Version::parse(trimmed) {
            return Ok(Self(version));
        }

        // Pad the numeric core (before any pre-release/build suffix)
        let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
        let (core, suffix) = trimmed.split_at(split_at);
        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty()
            || parts.len() > 3
            || parts
                .iter()
                .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(AnyAppError::InvalidVersion(format!(
                "invalid specific version: {}",
                input
            )));
        }
        let mut padded = parts.join(".");
        for _ in parts.len()..3 {
            padded.push_str(".0");
        }
        padded.push_str(suffix);

        semver::Version::parse(&padded)
            .map(Self)
            .map_err(|e| AnyAppError::InvalidVersion(format!("invalid specific version: {}: {}", input, e)))
    }

    /// Wrap an already parsed semantic version
    pub fn from_semver(version: semver::Version) -> Self {
        Self(version)
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }

    /// Strictly greater than `other`
    pub fn is_newer_than(&self, other: &SpecificVersion) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for SpecificVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SpecificVersion {
    type Err = AnyAppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SpecificVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SpecificVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SpecificVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A semantic version requirement such as `^1.2` or `>=1.0, <2.0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange(semver::VersionReq);

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self> {
        semver::VersionReq::parse(input.trim())
            .map(Self)
            .map_err(|e| AnyAppError::InvalidVersion(format!("invalid chart version: {}: {}", input, e)))
    }

    pub fn contains(&self, version: &SpecificVersion) -> bool {
        self.0.matches(&version.0)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version reference from an application spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartVersion {
    Specific(SpecificVersion),
    Range(VersionRange),
}

impl ChartVersion {
    /// Parse as an exact version first, then as a range.
    pub fn parse(input: &str) -> Result<Self> {
        if let Ok(version) = SpecificVersion::parse(input) {
            return Ok(ChartVersion::Specific(version));
        }
        VersionRange::parse(input).map(ChartVersion::Range)
    }

    /// Pick the newest of `available` satisfying this reference.
    pub fn select<'a, I>(&self, available: I) -> Option<SpecificVersion>
    where
        I: IntoIterator<Item = &'a SpecificVersion>,
    {
        match self {
            ChartVersion::Specific(wanted) => available.into_iter().find(|v| *v == wanted).cloned(),
            ChartVersion::Range(range) => available
                .into_iter()
                .filter(|v| range.contains(v))
                .max()
                .cloned(),
        }
    }
}

impl fmt::Display for ChartVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartVersion::Specific(v) => v.fmt(f),
            ChartVersion::Range(r) => r.fmt(f),
        }
    }
}

// src/version/mod.rs

//! Pack versions and runtime constraints
//!
//! Pack versions are dotted numeric triples (`1.4.2`). Runtime requirements
//! declared by a pack are semver requirement strings (`>=18`, `^1.2`).

use semver::{Version, VersionReq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` pack version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackVersion(Version);

impl PackVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// True when `next` raises the major component
    pub fn is_major_bump_to(&self, next: &PackVersion) -> bool {
        next.0.major > self.0.major
    }
}

/// Errors parsing a pack version
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pack version '{0}': expected MAJOR.MINOR.PATCH")]
pub struct VersionParseError(pub String);

impl FromStr for PackVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError(s.to_string()));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionParseError(s.to_string()));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionParseError(s.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl fmt::Display for PackVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Ord for PackVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PackVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for PackVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PackVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of checking one runtime requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCheck {
    Satisfied,
    /// Runtime present but version outside the requirement
    Unsatisfied { found: String },
    /// Runtime version not known to the engine
    Unknown,
    /// Requirement or found version did not parse
    Invalid(String),
}

/// Check a runtime version against a semver requirement string
///
/// Found versions are padded (`18` → `18.0.0`) so runtimes that only
/// report a major or major.minor still compare.
pub fn check_runtime(requirement: &str, found: Option<&str>) -> RuntimeCheck {
    let Some(found) = found else {
        return RuntimeCheck::Unknown;
    };

    let req = match VersionReq::parse(requirement) {
        Ok(r) => r,
        Err(e) => return RuntimeCheck::Invalid(format!("{}: {}", requirement, e)),
    };

    let normalized = normalize_runtime_version(found);
    let version = match Version::parse(&normalized) {
        Ok(v) => v,
        Err(e) => return RuntimeCheck::Invalid(format!("{}: {}", found, e)),
    };

    if req.matches(&version) {
        RuntimeCheck::Satisfied
    } else {
        RuntimeCheck::Unsatisfied {
            found: found.to_string(),
        }
    }
}

fn normalize_runtime_version(found: &str) -> String {
    let trimmed = found.trim().trim_start_matches('v');
    let core: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts: Vec<&str> = core.split('.').filter(|p| !p.is_empty()).collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    parts.truncate(3);
    parts.join(".")
}

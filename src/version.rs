//! Schema identifiers and subject version selectors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SchemaError;

/// Globally unique identifier assigned by the registry to a schema.
///
/// This is the id embedded in every encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub u32);

impl SchemaId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SchemaId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Selects a version within a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSpec {
    /// The most recent live version
    Latest,
    /// An explicit 1-based version number
    Number(u32),
}

impl VersionSpec {
    /// Parse a version selector ("latest", "3", "v3", or "-1" for latest)
    pub fn parse(spec: &str) -> Result<Self, SchemaError> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("latest") || spec == "-1" {
            return Ok(VersionSpec::Latest);
        }

        // Strip leading 'v' if present
        let digits = spec.strip_prefix('v').unwrap_or(spec);
        match digits.parse::<u32>() {
            Ok(0) | Err(_) => Err(SchemaError::InvalidVersion(spec.to_string())),
            Ok(n) => Ok(VersionSpec::Number(n)),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => write!(f, "latest"),
            VersionSpec::Number(n) => write!(f, "{}", n),
        }
    }
}

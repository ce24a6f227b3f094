//! Tool version triple and the `--version` report parser.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// A parsed `MAJOR.MINOR.PATCH` version.
///
/// Ordering is lexicographic over `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl ToolVersion {
    /// Build a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse the output of `<tool> --version`.
    ///
    /// The trimmed output must be exactly `<tool_name> MAJOR.MINOR.PATCH`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::VersionUnparseable` when the output does not match.
    pub fn parse_report(tool_name: &str, output: &str) -> Result<Self> {
        let pattern = format!(r"^{} (\d+)\.(\d+)\.(\d+)$", regex::escape(tool_name));
        let re = Regex::new(&pattern)
            .map_err(|err| AppError::Config(format!("invalid tool name pattern: {err}")))?;

        let trimmed = output.trim();
        let captures = re.captures(trimmed).ok_or_else(|| {
            AppError::VersionUnparseable(format!(
                "{tool_name} --version showed unknown message: {trimmed:?}"
            ))
        })?;

        let component = |idx: usize| -> Result<u64> {
            captures[idx].parse::<u64>().map_err(|err| {
                AppError::VersionUnparseable(format!("version component out of range: {err}"))
            })
        };

        Ok(Self::new(component(1)?, component(2)?, component(3)?))
    }

    /// Whether this version is at or above `minimum`.
    #[must_use]
    pub fn meets(&self, minimum: &Self) -> bool {
        self >= minimum
    }
}

impl Display for ToolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ToolVersion {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u64> {
            parts
                .next()
                .and_then(|p| p.parse::<u64>().ok())
                .ok_or_else(|| AppError::Config(format!("invalid version '{s}'")))
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(AppError::Config(format!("invalid version '{s}'")));
        }
        Ok(version)
    }
}

impl TryFrom<String> for ToolVersion {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ToolVersion> for String {
    fn from(value: ToolVersion) -> Self {
        value.to_string()
    }
}

// ABOUTME: Validated version tag shared by all artifacts of an attempt.
// ABOUTME: Accepts release tags like v1.2.3 or build identifiers.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VersionTagError {
    #[error("version tag cannot be empty")]
    Empty,

    #[error("version tag exceeds maximum length of 128 characters")]
    TooLong,

    #[error("version tag cannot be 'latest' (reserved as the floating alias)")]
    ReservedLatest,

    #[error("version tag cannot start with '{0}'")]
    BadLeadingChar(char),

    #[error("invalid character in version tag: '{0}'")]
    InvalidChar(char),
}

/// The version every image built in one attempt is tagged with.
///
/// Follows image tag grammar: alphanumeric plus `.`, `-`, `_`, not starting
/// with a separator. `latest` is rejected because the pipeline applies it as
/// a floating alias alongside the version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn parse(input: &str) -> Result<Self, VersionTagError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(VersionTagError::Empty);
        }

        if input.len() > 128 {
            return Err(VersionTagError::TooLong);
        }

        if input == "latest" {
            return Err(VersionTagError::ReservedLatest);
        }

        let first = input.chars().next().unwrap();
        if first == '.' || first == '-' || first == '_' {
            return Err(VersionTagError::BadLeadingChar(first));
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric() && c != '.' && c != '-' && c != '_' {
                return Err(VersionTagError::InvalidChar(c));
            }
        }

        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for VersionTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionTag::parse(&s).map_err(serde::de::Error::custom)
    }
}

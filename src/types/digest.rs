// ABOUTME: Content digest for built container images.
// ABOUTME: Parses and compares sha256 digests byte-for-byte.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseDigestError {
    #[error("digest cannot be empty")]
    Empty,

    #[error("digest must start with an algorithm prefix (e.g. sha256:)")]
    MissingAlgorithm,

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("digest hex must be 64 lowercase hex characters, got {0} characters")]
    BadLength(usize),

    #[error("invalid character in digest hex: '{0}'")]
    InvalidChar(char),
}

/// A `sha256:<hex>` content digest as reported by builders and registries.
///
/// Equality is byte-for-byte on the full canonical form; this is the check
/// that gates an artifact as pushed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageDigest(String);

impl ImageDigest {
    pub fn parse(input: &str) -> Result<Self, ParseDigestError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseDigestError::Empty);
        }

        let (algorithm, hex) = input
            .split_once(':')
            .ok_or(ParseDigestError::MissingAlgorithm)?;

        if algorithm != "sha256" {
            return Err(ParseDigestError::UnsupportedAlgorithm(
                algorithm.to_string(),
            ));
        }

        if hex.len() != 64 {
            return Err(ParseDigestError::BadLength(hex.len()));
        }

        for c in hex.chars() {
            if !c.is_ascii_digit() && !('a'..='f').contains(&c) {
                return Err(ParseDigestError::InvalidChar(c));
            }
        }

        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ImageDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageDigest::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ABOUTME: Container image reference parsing and construction.
// ABOUTME: Handles registry/name:tag@digest forms and retagging for pushes.

use std::fmt;
use thiserror::Error;

use super::VersionTag;

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// A parsed image reference: `[registry/]name[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: Option<String>,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric()
                && c != '/'
                && c != ':'
                && c != '.'
                && c != '-'
                && c != '_'
                && c != '@'
            {
                return Err(ParseImageRefError::InvalidChar(c));
            }
        }

        let (without_digest, digest) = match input.split_once('@') {
            Some((before, after)) => (before, Some(after.to_string())),
            None => (input, None),
        };

        // A trailing colon segment is a tag unless it contains a slash, in
        // which case the colon belongs to a registry port.
        let (without_tag, tag) = match without_digest.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => (before, Some(after.to_string())),
            _ => (without_digest, None),
        };

        let (registry, name) = Self::split_registry(without_tag)?;

        Ok(Self {
            registry,
            name,
            tag,
            digest,
        })
    }

    /// Build a reference for a repository and version tag, the form the
    /// artifact pipeline produces for every component it builds.
    pub fn for_repository(
        registry: Option<&str>,
        repository: &str,
        tag: &VersionTag,
    ) -> Result<Self, ParseImageRefError> {
        let joined = match registry {
            Some(reg) => format!("{}/{}:{}", reg, repository, tag),
            None => format!("{}:{}", repository, tag),
        };
        Self::parse(&joined)
    }

    /// The same image under a different tag (used for the floating `latest`
    /// alias). Drops any digest, which is tag-specific.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    fn split_registry(input: &str) -> Result<(Option<String>, String), ParseImageRefError> {
        // A registry is present if the first path component contains a dot or
        // colon, or is "localhost".
        let parts: Vec<&str> = input.splitn(2, '/').collect();

        match parts.as_slice() {
            [name] if !name.is_empty() => Ok((None, (*name).to_string())),
            [first, rest] if !rest.is_empty() => {
                if first.contains('.') || first.contains(':') || *first == "localhost" {
                    Ok((Some((*first).to_string()), (*rest).to_string()))
                } else {
                    Ok((None, input.to_string()))
                }
            }
            _ => Err(ParseImageRefError::InvalidFormat(input.to_string())),
        }
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl serde::Serialize for ImageRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ImageRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        ImageRef::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        let r = ImageRef::parse("arena-api").unwrap();
        assert_eq!(r.registry(), None);
        assert_eq!(r.name(), "arena-api");
        assert_eq!(r.tag(), None);
    }

    #[test]
    fn parses_registry_name_and_tag() {
        let r = ImageRef::parse("123456789.dkr.ecr.us-east-1.amazonaws.com/arena-api:v1.2.3")
            .unwrap();
        assert_eq!(
            r.registry(),
            Some("123456789.dkr.ecr.us-east-1.amazonaws.com")
        );
        assert_eq!(r.name(), "arena-api");
        assert_eq!(r.tag(), Some("v1.2.3"));
    }

    #[test]
    fn registry_port_colon_is_not_a_tag() {
        let r = ImageRef::parse("localhost:5000/arena-api").unwrap();
        assert_eq!(r.registry(), Some("localhost:5000"));
        assert_eq!(r.name(), "arena-api");
        assert_eq!(r.tag(), None);
    }

    #[test]
    fn for_repository_joins_parts() {
        let tag = VersionTag::parse("v2.0.0").unwrap();
        let r = ImageRef::for_repository(Some("registry.example.com"), "arena-worker", &tag)
            .unwrap();
        assert_eq!(r.to_string(), "registry.example.com/arena-worker:v2.0.0");
    }

    #[test]
    fn with_tag_replaces_tag_and_drops_digest() {
        let r = ImageRef::parse(&format!(
            "registry.example.com/arena-api:v1@sha256:{}",
            "a".repeat(64)
        ))
        .unwrap();
        let latest = r.with_tag("latest");
        assert_eq!(latest.to_string(), "registry.example.com/arena-api:latest");
    }

    #[test]
    fn rejects_empty_and_bad_chars() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("arena api").is_err());
    }
}

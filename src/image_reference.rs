use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Registry that references without an explicit registry host resolve to.
pub const DOCKER_HUB_REGISTRY: &str = "index.docker.io";
const DOCKER_HUB_ALIAS: &str = "docker.io";
const DOCKER_HUB_OFFICIAL_NAMESPACE: &str = "library";
const DEFAULT_TAG: &str = "latest";
const MAX_TAG_LENGTH: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("image reference is empty")]
    Empty,
    #[error("invalid registry {0:?}")]
    InvalidRegistry(String),
    #[error("invalid repository {0:?}")]
    InvalidRepository(String),
    #[error("invalid tag {0:?}")]
    InvalidTag(String),
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),
}

/// A registry authority (`host[:port]`). Two registries are the same registry when their
/// authorities are equal, independent of how the surrounding reference was spelled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Registry(String);

impl Registry {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let authority = s.to_ascii_lowercase();
        if authority == DOCKER_HUB_ALIAS {
            return Ok(Self::docker_hub());
        }
        if !is_valid_authority(&authority) {
            return Err(ParseError::InvalidRegistry(s.to_string()));
        }
        Ok(Registry(authority))
    }

    pub fn docker_hub() -> Self {
        Registry(DOCKER_HUB_REGISTRY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part of the authority, without the port.
    pub fn host(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Registry {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Registry::parse(s)
    }
}

impl TryFrom<String> for Registry {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Registry::parse(&value)
    }
}

impl From<Registry> for String {
    fn from(value: Registry) -> Self {
        value.0
    }
}

/// Content digest, e.g. `sha256:33cef0ff...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidDigest(s.to_string());
        let (algorithm, hex) = s.split_once(':').ok_or_else(invalid)?;

        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            _ => return Err(invalid()),
        };
        if hex.len() != expected_len || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(invalid());
        }

        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// What a reference points at within its repository: exactly one of a tag or a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Tag(String),
    Digest(Digest),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Tag(tag) => f.write_str(tag),
            Identifier::Digest(digest) => write!(f, "{}", digest),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: Registry,
    repository: String,
    identifier: Identifier,
}

/// Serializes to the fully qualified form, e.g. `index.docker.io/library/nginx:latest`.
impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            Identifier::Digest(digest) => {
                write!(f, "{}/{}@{}", self.registry, self.repository, digest)
            }
        }
    }
}

impl FromStr for ImageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageReference::parse(s)
    }
}

impl ImageReference {
    /// Parses a container image reference the way container runtimes resolve them: a missing
    /// registry means Docker Hub, a missing identifier means `latest` and a digest takes
    /// precedence over a tag when both are given.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => (name, Some(Digest::parse(digest)?)),
            None => (s, None),
        };

        // a colon after the last slash separates the tag, any earlier colon belongs to a port
        let (name, tag) = match name.rfind(':') {
            Some(pos) if name.rfind('/').is_none_or(|slash| pos > slash) => {
                (&name[..pos], Some(&name[pos + 1..]))
            }
            _ => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => (Registry::parse(first)?, rest),
            _ => (Registry::docker_hub(), name),
        };

        let repository = if registry.as_str() == DOCKER_HUB_REGISTRY && !repository.contains('/')
        {
            format!("{}/{}", DOCKER_HUB_OFFICIAL_NAMESPACE, repository)
        } else {
            repository.to_string()
        };
        if !is_valid_repository(&repository) {
            return Err(ParseError::InvalidRepository(repository));
        }

        if let Some(tag) = tag.filter(|tag| !is_valid_tag(tag)) {
            return Err(ParseError::InvalidTag(tag.to_string()));
        }
        let identifier = match (digest, tag) {
            (Some(digest), _) => Identifier::Digest(digest),
            (None, Some(tag)) => Identifier::Tag(tag.to_string()),
            (None, None) => Identifier::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            identifier,
        })
    }

    /// Builds a tag reference, applying the same repository and tag rules as `parse`.
    pub fn with_tag(registry: Registry, repository: String, tag: String) -> Result<Self, ParseError> {
        if !is_valid_repository(&repository) {
            return Err(ParseError::InvalidRepository(repository));
        }
        if !is_valid_tag(&tag) {
            return Err(ParseError::InvalidTag(tag));
        }

        Ok(Self {
            registry,
            repository,
            identifier: Identifier::Tag(tag),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

fn looks_like_registry(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn is_valid_authority(authority: &str) -> bool {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };

    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) || port.parse::<u16>().is_err()
        {
            return false;
        }
    }

    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_valid_repository(repository: &str) -> bool {
    repository.split('/').all(is_valid_path_component)
}

/// Path components are lowercase alphanumeric runs joined by `.`, `_`, `__` or runs of `-`.
fn is_valid_path_component(component: &str) -> bool {
    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !component.starts_with(is_alnum) || !component.ends_with(is_alnum) {
        return false;
    }

    let mut separator = String::new();
    for c in component.chars() {
        if is_alnum(c) {
            if !separator.is_empty() {
                let valid = matches!(separator.as_str(), "." | "_" | "__")
                    || separator.chars().all(|s| s == '-');
                if !valid {
                    return false;
                }
                separator.clear();
            }
        } else if matches!(c, '.' | '_' | '-') {
            separator.push(c);
        } else {
            return false;
        }
    }
    true
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let first_valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');

    first_valid
        && tag.len() <= MAX_TAG_LENGTH
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

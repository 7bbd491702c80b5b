use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const DEFAULT_TAG: &str = "latest";

/// Represents a repository reference of the form `registry/repository:tag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReference {
    /// Registry host, optionally with a port
    pub registry: String,
    /// Repository name, may contain `/`
    pub repository: String,
    /// Tag the manifest is stored under
    pub tag: String,
}

impl RepositoryReference {
    /// Create a new RepositoryReference
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl FromStr for RepositoryReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            Error::Configuration(format!("invalid image address '{}': {}", s, reason))
        };

        // The registry is everything before the first '/'
        let (registry, rest) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected registry/repository:tag"))?;

        if registry.is_empty() {
            return Err(invalid("missing registry"));
        }

        // A ':' only separates the tag when it follows the last '/'
        let last_segment = rest.rsplit('/').next().unwrap_or(rest);
        let (repository, tag) = match last_segment.rsplit_once(':') {
            Some((_, tag)) => (&rest[..rest.len() - tag.len() - 1], tag),
            None => (rest, DEFAULT_TAG),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("missing repository"));
        }
        if tag.is_empty() {
            return Err(invalid("missing tag"));
        }

        Ok(RepositoryReference::new(registry, repository, tag))
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Direction of a failed registry exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read file {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write to output {}: {source}", path.display())]
    OutputUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Registry {registry} is unreachable: {source}")]
    RegistryUnreachable {
        registry: String,
        source: reqwest::Error,
    },

    #[error("Authentication failed for {registry}: {reason}")]
    AuthenticationFailed { registry: String, reason: String },

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Failed to {direction} {artifact} ({reference}): {reason}")]
    TransferFailed {
        direction: Direction,
        artifact: String,
        reference: String,
        reason: String,
    },
}

impl Error {
    pub(crate) fn transfer(
        direction: Direction,
        artifact: impl Into<String>,
        reference: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Error::TransferFailed {
            direction,
            artifact: artifact.into(),
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

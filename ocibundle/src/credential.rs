use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::Result;
use crate::image_reference::RepositoryReference;

/// Username and password for a registry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value for an `Authorization: Basic` header.
    pub fn basic_auth(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies the credential for a request.
///
/// Invoked once per request, so implementations may rotate credentials or
/// serve several repositories.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self, reference: &RepositoryReference) -> Result<Credential>;
}

impl<F> CredentialProvider for F
where
    F: Fn(&RepositoryReference) -> Result<Credential> + Send + Sync,
{
    fn credential(&self, reference: &RepositoryReference) -> Result<Credential> {
        self(reference)
    }
}

/// The same credential for every request.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credential);

impl StaticCredentials {
    pub fn new(credential: Credential) -> Self {
        Self(credential)
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self, _reference: &RepositoryReference) -> Result<Credential> {
        Ok(self.0.clone())
    }
}

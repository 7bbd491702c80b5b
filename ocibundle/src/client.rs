use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, info, instrument};

use crate::credential::CredentialProvider;
use crate::descriptor::{Annotations, Descriptor, MEDIA_TYPE_IMAGE_MANIFEST};
use crate::digest::OciDigest;
use crate::error::{Direction, Error, Result};
use crate::image_reference::RepositoryReference;
use crate::size::byte_count_iec;

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// Connection settings shared by every session of a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Talk to the registry over `http` instead of `https`.
    pub plain_http: bool,
    /// Deadline applied to each request.
    pub timeout: Option<Duration>,
    /// Upper bound on blob transfers in flight at once.
    pub concurrency: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            plain_http: false,
            timeout: None,
            concurrency: 1,
        }
    }
}

/// A client for interacting with OCI registries.
pub struct Client {
    client: ReqwestClient,
    options: ClientOptions,
    credentials: Arc<dyn CredentialProvider>,
}

impl Client {
    /// Create a new client. `credentials` is asked for a credential on every
    /// request.
    pub fn new(options: ClientOptions, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let mut builder = ReqwestClient::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            options,
            credentials,
        })
    }

    /// Create a new session for the given repository.
    pub fn session(&self, reference: RepositoryReference) -> Result<ClientSession> {
        let scheme = if self.options.plain_http { "http" } else { "https" };
        let registry_url = Url::parse(&format!("{}://{}/", scheme, reference.registry))
            .map_err(|e| {
                Error::Configuration(format!("invalid registry '{}': {}", reference.registry, e))
            })?;

        Ok(ClientSession {
            reference,
            registry_url,
            client: self.client.clone(),
            credentials: Arc::clone(&self.credentials),
            concurrency: self.options.concurrency.max(1),
        })
    }
}

/// A session for interacting with a specific repository in an OCI registry.
pub struct ClientSession {
    reference: RepositoryReference,
    registry_url: Url,
    client: ReqwestClient,
    credentials: Arc<dyn CredentialProvider>,
    concurrency: usize,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("reference", &self.reference)
            .field("registry_url", &self.registry_url.as_str())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

/// What a request is about, for error reporting.
struct Exchange<'a> {
    direction: Direction,
    artifact: &'a str,
    reference: &'a (dyn fmt::Display + Sync),
}

impl Exchange<'_> {
    fn fail(&self, reason: impl Into<String>) -> Error {
        Error::transfer(self.direction, self.artifact, self.reference, reason)
    }
}

impl ClientSession {
    pub fn reference(&self) -> &RepositoryReference {
        &self.reference
    }

    /// Number of blob transfers allowed in flight at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn repository_url(&self, path: &str) -> Result<Url> {
        self.registry_url
            .join(&format!("v2/{}/{}", self.reference.repository, path))
            .map_err(|e| {
                Error::Configuration(format!(
                    "invalid repository '{}': {}",
                    self.reference.repository, e
                ))
            })
    }

    /// Build a request carrying the credential for this repository.
    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let credential = self.credentials.credential(&self.reference)?;
        debug!("{} {}", method, url);
        Ok(self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, credential.basic_auth()))
    }

    /// Send a request, mapping transport and auth failures.
    async fn send(&self, request: RequestBuilder, exchange: &Exchange<'_>) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                Error::RegistryUnreachable {
                    registry: self.reference.registry.clone(),
                    source: e,
                }
            } else {
                exchange.fail(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthenticationFailed {
                registry: self.reference.registry.clone(),
                reason: format!("registry answered {}", response.status()),
            }),
            _ => Ok(response),
        }
    }

    /// Check that the registry speaks the distribution API and accepts our
    /// credential.
    pub async fn resolve(&self, direction: Direction) -> Result<()> {
        let url = self
            .registry_url
            .join("v2/")
            .map_err(|e| Error::Configuration(e.to_string()))?;
        let exchange = Exchange {
            direction,
            artifact: "registry API",
            reference: &self.reference.registry,
        };

        let response = self.send(self.request(Method::GET, url)?, &exchange).await?;
        if response.status() != StatusCode::OK {
            return Err(exchange.fail(format!("unexpected status {}", response.status())));
        }

        Ok(())
    }

    /// Check if a blob with the given digest exists.
    pub async fn blob_exists(&self, digest: &OciDigest) -> Result<bool> {
        let url = self.repository_url(&format!("blobs/{}", digest))?;
        let exchange = Exchange {
            direction: Direction::Push,
            artifact: "blob",
            reference: digest,
        };

        let response = self.send(self.request(Method::HEAD, url)?, &exchange).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(exchange.fail(format!("unexpected status {}", status))),
        }
    }

    /// Upload a blob unless the registry already has its digest.
    ///
    /// Returns `false` when the upload was skipped.
    #[instrument(skip(self, descriptor, content), fields(digest = %descriptor.digest))]
    pub async fn push_blob(
        &self,
        name: &str,
        descriptor: &Descriptor,
        content: Bytes,
    ) -> Result<bool> {
        let exchange = Exchange {
            direction: Direction::Push,
            artifact: name,
            reference: &descriptor.digest,
        };

        if self.blob_exists(&descriptor.digest).await? {
            info!("Skipping {} [{}], already present", name, byte_count_iec(descriptor.size));
            return Ok(false);
        }

        info!("Pushing {} [{}]", name, byte_count_iec(descriptor.size));

        // Start upload
        let start_url = self.repository_url("blobs/uploads/")?;
        let start_response = self
            .send(self.request(Method::POST, start_url)?, &exchange)
            .await?;

        if start_response.status() != StatusCode::ACCEPTED {
            let status = start_response.status();
            let error_body = start_response.text().await.unwrap_or_default();
            return Err(exchange.fail(format!(
                "failed to start upload: {} - {}",
                status, error_body
            )));
        }

        // Get the upload location
        let location = start_response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| exchange.fail("no location header in upload response"))?;

        let mut upload_url = self
            .registry_url
            .join(location)
            .map_err(|e| exchange.fail(format!("invalid upload location '{}': {}", location, e)))?;
        upload_url
            .query_pairs_mut()
            .append_pair("digest", &descriptor.digest.to_string());

        // Complete upload in a single request
        let request = self
            .request(Method::PUT, upload_url)?
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        let complete_response = self.send(request, &exchange).await?;

        if complete_response.status() != StatusCode::CREATED {
            let status = complete_response.status();
            let error_body = complete_response.text().await.unwrap_or_default();
            return Err(exchange.fail(format!(
                "failed to complete upload: {} - {}",
                status, error_body
            )));
        }

        Ok(true)
    }

    /// Upload a manifest and tag it.
    #[instrument(skip(self, descriptor, content), fields(digest = %descriptor.digest))]
    pub async fn push_manifest(
        &self,
        tag: &str,
        descriptor: &Descriptor,
        content: Bytes,
    ) -> Result<()> {
        let exchange = Exchange {
            direction: Direction::Push,
            artifact: "manifest",
            reference: &descriptor.digest,
        };

        info!("Pushing manifest {} as {}", descriptor.digest, tag);

        let url = self.repository_url(&format!("manifests/{}", tag))?;
        let request = self
            .request(Method::PUT, url)?
            .header(header::CONTENT_TYPE, descriptor.media_type.as_str())
            .body(content);
        let response = self.send(request, &exchange).await?;

        if response.status() != StatusCode::CREATED && response.status() != StatusCode::OK {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(exchange.fail(format!(
                "failed to register manifest: {} - {}",
                status, error_body
            )));
        }

        Ok(())
    }

    /// Fetch the manifest a tag points at, with the descriptor addressing it.
    #[instrument(skip(self))]
    pub async fn fetch_reference(&self, tag: &str) -> Result<(Descriptor, Bytes)> {
        let exchange = Exchange {
            direction: Direction::Pull,
            artifact: "manifest",
            reference: &tag,
        };

        let url = self.repository_url(&format!("manifests/{}", tag))?;
        let request = self
            .request(Method::GET, url)?
            .header(header::ACCEPT, MEDIA_TYPE_IMAGE_MANIFEST);
        let response = self.send(request, &exchange).await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(exchange.fail("manifest not found")),
            status => return Err(exchange.fail(format!("unexpected status {}", status))),
        }

        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| MEDIA_TYPE_IMAGE_MANIFEST.to_string());
        let advertised = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| OciDigest::from_str(value).ok());

        let content = response
            .bytes()
            .await
            .map_err(|e| exchange.fail(format!("failed to read manifest: {}", e)))?;
        let descriptor = Descriptor::from_bytes(media_type, &content, Annotations::new())?;

        if let Some(advertised) = advertised {
            if advertised != descriptor.digest {
                return Err(exchange.fail(format!(
                    "digest mismatch: registry advertised {}, content is {}",
                    advertised, descriptor.digest
                )));
            }
        }

        debug!("Resolved {} to {}", tag, descriptor.digest);
        Ok((descriptor, content))
    }

    /// Fetch a blob and check it against its descriptor.
    #[instrument(skip(self, descriptor), fields(digest = %descriptor.digest))]
    pub async fn fetch_blob(&self, name: &str, descriptor: &Descriptor) -> Result<Bytes> {
        let exchange = Exchange {
            direction: Direction::Pull,
            artifact: name,
            reference: &descriptor.digest,
        };

        info!("Downloading blob {} [{}]", name, byte_count_iec(descriptor.size));

        let url = self.repository_url(&format!("blobs/{}", descriptor.digest))?;
        let response = self.send(self.request(Method::GET, url)?, &exchange).await?;

        if response.status() != StatusCode::OK {
            return Err(exchange.fail(format!("failed to fetch blob: {}", response.status())));
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| exchange.fail(format!("failed to read blob: {}", e)))?;

        if OciDigest::size_of(&content) != descriptor.size {
            return Err(exchange.fail(format!(
                "size mismatch: expected {} bytes, got {}",
                descriptor.size,
                content.len()
            )));
        }
        if !descriptor.digest.verify(&content) {
            return Err(exchange.fail("content does not match digest"));
        }

        Ok(content)
    }
}

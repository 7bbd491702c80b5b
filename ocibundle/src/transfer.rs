//! Push and pull of a whole bundle.
//!
//! Both operations walk a fixed sequence of stages and never revisit one.
//! A push exchanges every blob before the manifest, so the registry can
//! resolve each digest the manifest names. A pull exchanges the manifest
//! first, since it is the only source of the blob digests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::pin::pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::client::ClientSession;
use crate::descriptor::Descriptor;
use crate::error::{Direction, Error, Result};
use crate::manifest::{Artifact, ArtifactAssembler, ImageManifest};
use crate::materializer::LocalMaterializer;
use crate::size::byte_count_iec;

/// Stages of a push or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Init,
    Resolve,
    ManifestExchange,
    BlobExchange,
    Done,
}

/// Records the stages an operation passed through.
#[derive(Debug)]
struct StageTracker {
    visited: Vec<TransferStage>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            visited: vec![TransferStage::Init],
        }
    }

    fn advance(&mut self, next: TransferStage) {
        debug_assert!(
            !self.visited.contains(&next),
            "transfer stage {:?} entered twice",
            next
        );
        debug!("Entering stage {:?}", next);
        self.visited.push(next);
    }

    fn finish(mut self) -> Vec<TransferStage> {
        self.advance(TransferStage::Done);
        self.visited
    }
}

/// An exchange with a registry repository.
#[async_trait]
pub trait Operation: Send {
    type Output: Send;

    async fn run(self, session: &ClientSession) -> Result<Self::Output>;
}

/// Upload an artifact and tag its manifest.
#[derive(Debug, Clone)]
pub struct Push {
    tag: String,
    artifact: Artifact,
}

impl Push {
    pub fn new(tag: impl Into<String>, artifact: Artifact) -> Self {
        Self {
            tag: tag.into(),
            artifact,
        }
    }
}

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// Descriptor of the manifest now stored under the tag
    pub manifest: Descriptor,
    /// Blobs actually uploaded
    pub uploaded: usize,
    /// Blobs the registry already had
    pub skipped: usize,
    pub stages: Vec<TransferStage>,
}

#[async_trait]
impl Operation for Push {
    type Output = PushOutcome;

    async fn run(self, session: &ClientSession) -> Result<PushOutcome> {
        let mut stages = StageTracker::new();
        let artifact = &self.artifact;

        info!(
            "Pushing blobs to {}/{}:{} [{}]",
            session.reference().registry,
            session.reference().repository,
            self.tag,
            byte_count_iec(artifact.layers_size())
        );

        stages.advance(TransferStage::Resolve);
        session.resolve(Direction::Push).await?;

        stages.advance(TransferStage::BlobExchange);
        let uploads: Vec<BoxFuture<'_, Result<bool>>> = artifact
            .layers
            .iter()
            .map(|layer| (layer.blob.name.as_str(), &layer.descriptor, layer.blob.data.clone()))
            .chain(std::iter::once((
                "config",
                &artifact.config_descriptor,
                artifact.config.data.clone(),
            )))
            .map(|(name, descriptor, data)| session.push_blob(name, descriptor, data).boxed())
            .collect();

        let results: Vec<bool> = stream::iter(uploads)
            .buffered(session.concurrency())
            .try_collect()
            .await?;
        let uploaded = results.iter().filter(|uploaded| **uploaded).count();

        // Every blob is in the registry before the manifest names it
        stages.advance(TransferStage::ManifestExchange);
        session
            .push_manifest(
                &self.tag,
                &artifact.manifest_descriptor,
                artifact.manifest_bytes.clone(),
            )
            .await?;

        info!(
            "Pushed {} ({} uploaded, {} already present)",
            artifact.manifest_descriptor.digest,
            uploaded,
            results.len() - uploaded
        );

        Ok(PushOutcome {
            manifest: artifact.manifest_descriptor.clone(),
            uploaded,
            skipped: results.len() - uploaded,
            stages: stages.finish(),
        })
    }
}

/// Download the artifact behind a tag into a directory.
#[derive(Debug, Clone)]
pub struct Pull {
    tag: String,
    materializer: LocalMaterializer,
}

impl Pull {
    pub fn new(tag: impl Into<String>, materializer: LocalMaterializer) -> Self {
        Self {
            tag: tag.into(),
            materializer,
        }
    }
}

/// Result of a successful pull.
#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub manifest_descriptor: Descriptor,
    pub manifest: ImageManifest,
    /// Written files, in manifest order
    pub files: Vec<PathBuf>,
    pub stages: Vec<TransferStage>,
}

/// Titles of every layer, checked before any blob is fetched.
fn layer_titles(manifest: &ImageManifest) -> Result<Vec<&str>> {
    let mut seen = HashSet::new();
    manifest
        .layers
        .iter()
        .map(|layer| {
            let title = layer.title().unwrap_or_default();
            LocalMaterializer::check_filename(title)?;
            if !seen.insert(title) {
                return Err(Error::MalformedManifest(format!(
                    "more than one layer is titled '{}'",
                    title
                )));
            }
            Ok(title)
        })
        .collect()
}

#[async_trait]
impl Operation for Pull {
    type Output = PullOutcome;

    async fn run(self, session: &ClientSession) -> Result<PullOutcome> {
        // Nothing goes over the network until the output is known to exist
        self.materializer.ensure_output()?;

        let mut stages = StageTracker::new();
        info!(
            "Pulling blobs from {}/{}:{}",
            session.reference().registry,
            session.reference().repository,
            self.tag
        );

        stages.advance(TransferStage::Resolve);
        session.resolve(Direction::Pull).await?;

        stages.advance(TransferStage::ManifestExchange);
        let (manifest_descriptor, content) = session.fetch_reference(&self.tag).await?;
        let manifest = ArtifactAssembler::decode(&content)?;

        let files = {
            let titles = layer_titles(&manifest)?;

            stages.advance(TransferStage::BlobExchange);
            let fetches: Vec<BoxFuture<'_, Result<(&str, Bytes)>>> = manifest
                .layers
                .iter()
                .zip(titles)
                .map(|(layer, title)| {
                    async move {
                        session
                            .fetch_blob(title, layer)
                            .await
                            .map(|content| (title, content))
                    }
                    .boxed()
                })
                .collect();

            // Results arrive in manifest order, whatever the concurrency
            let mut downloads = pin!(stream::iter(fetches).buffered(session.concurrency()));
            let mut files = Vec::with_capacity(manifest.layers.len());
            while let Some(download) = downloads.next().await {
                let (title, content) = download?;
                files.push(self.materializer.write(title, &content)?);
            }
            files
        };

        info!(
            "Pulled {} file(s) into {}",
            files.len(),
            self.materializer.output().display()
        );

        Ok(PullOutcome {
            manifest_descriptor,
            manifest,
            files,
            stages: stages.finish(),
        })
    }
}

//! Assembly and decoding of the image manifest that ties a bundle together.
//!
//! ```text
//!   tag ──► manifest ──┬──► config
//!                      ├──► layer (a.txt)
//!                      └──► layer (b.txt)
//! ```

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::{
    title_annotations, Annotations, Blob, Descriptor, ANNOTATION_CREATED,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST,
    MEDIA_TYPE_LAYER_TAR, MEDIA_TYPE_UNKNOWN_CONFIG,
};
use crate::error::{Error, Result};

const SCHEMA_VERSION: u32 = 2;

/// Represents an OCI image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Schema version of the manifest
    pub schema_version: u32,
    /// Media type of the manifest
    #[serde(default = "default_manifest_media_type")]
    pub media_type: String,
    /// Descriptor for the config blob
    pub config: Descriptor,
    /// Descriptors for the layer blobs, in bundle order
    pub layers: Vec<Descriptor>,
    /// Manifest annotations
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

fn default_manifest_media_type() -> String {
    MEDIA_TYPE_IMAGE_MANIFEST.to_string()
}

impl ImageManifest {
    /// Creation time recorded in the manifest annotations.
    pub fn created(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_CREATED).map(String::as_str)
    }
}

/// The config blob referenced by a manifest.
///
/// Bundles carry no real configuration, so the default is a fixed
/// placeholder. Registries reject manifests without a config, so one is
/// always pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBlob {
    pub media_type: String,
    pub data: Bytes,
}

impl ConfigBlob {
    pub fn new(media_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

impl Default for ConfigBlob {
    fn default() -> Self {
        Self::new(MEDIA_TYPE_UNKNOWN_CONFIG, Bytes::from_static(b"{}"))
    }
}

/// A blob together with the descriptor the manifest uses for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLayer {
    pub blob: Blob,
    pub descriptor: Descriptor,
}

/// Everything a push needs: the layers, the config and the serialized
/// manifest with its own descriptor.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub manifest: ImageManifest,
    pub manifest_bytes: Bytes,
    pub manifest_descriptor: Descriptor,
    pub config: ConfigBlob,
    pub config_descriptor: Descriptor,
    pub layers: Vec<BlobLayer>,
}

impl Artifact {
    /// Total number of payload bytes across all layers.
    pub fn layers_size(&self) -> u64 {
        self.layers.iter().map(|layer| layer.descriptor.size).sum()
    }
}

/// Builds manifests from blobs and parses manifests fetched from a registry.
#[derive(Debug, Clone)]
pub struct ArtifactAssembler {
    config: ConfigBlob,
}

impl Default for ArtifactAssembler {
    fn default() -> Self {
        Self::new(ConfigBlob::default())
    }
}

impl ArtifactAssembler {
    pub fn new(config: ConfigBlob) -> Self {
        Self { config }
    }

    /// Assemble an artifact stamped with the current time.
    pub fn assemble(&self, blobs: Vec<Blob>) -> Result<Artifact> {
        self.assemble_at(blobs, Utc::now())
    }

    /// Assemble an artifact with an explicit creation time.
    pub fn assemble_at(&self, blobs: Vec<Blob>, created: DateTime<Utc>) -> Result<Artifact> {
        let layers = blobs
            .into_iter()
            .map(|blob| {
                let descriptor = Descriptor::from_bytes(
                    MEDIA_TYPE_LAYER_TAR,
                    &blob.data,
                    title_annotations(&blob.name),
                )?;
                Ok(BlobLayer { blob, descriptor })
            })
            .collect::<Result<Vec<_>>>()?;

        let config_descriptor = Descriptor::from_bytes(
            self.config.media_type.as_str(),
            &self.config.data,
            Annotations::new(),
        )?;

        let mut annotations = Annotations::new();
        annotations.insert(
            ANNOTATION_CREATED.to_string(),
            created.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let manifest = ImageManifest {
            schema_version: SCHEMA_VERSION,
            media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
            config: config_descriptor.clone(),
            layers: layers.iter().map(|layer| layer.descriptor.clone()).collect(),
            annotations,
        };

        let manifest_bytes = Bytes::from(Self::encode(&manifest)?);
        let manifest_descriptor =
            Descriptor::from_bytes(MEDIA_TYPE_IMAGE_MANIFEST, &manifest_bytes, Annotations::new())?;

        Ok(Artifact {
            manifest,
            manifest_bytes,
            manifest_descriptor,
            config: self.config.clone(),
            config_descriptor,
            layers,
        })
    }

    /// Serialize a manifest. Field order is fixed by the struct and
    /// annotations are sorted, so equal manifests give equal bytes.
    pub fn encode(manifest: &ImageManifest) -> Result<Vec<u8>> {
        serde_json::to_vec(manifest)
            .map_err(|e| Error::MalformedManifest(format!("failed to encode manifest: {}", e)))
    }

    /// Parse manifest bytes fetched from a registry.
    pub fn decode(content: &[u8]) -> Result<ImageManifest> {
        let manifest: ImageManifest = serde_json::from_slice(content)
            .map_err(|e| Error::MalformedManifest(format!("failed to decode manifest: {}", e)))?;

        if manifest.schema_version != SCHEMA_VERSION {
            return Err(Error::MalformedManifest(format!(
                "unsupported schema version {}",
                manifest.schema_version
            )));
        }

        if manifest.media_type == MEDIA_TYPE_IMAGE_INDEX
            || manifest.media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST
        {
            return Err(Error::MalformedManifest(format!(
                "{} is an index, not an image manifest",
                manifest.media_type
            )));
        }

        Ok(manifest)
    }
}

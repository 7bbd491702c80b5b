use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::digest::OciDigest;
use crate::error::{Error, Result};

/// Media type of an OCI image manifest
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Media type of an OCI image index (not supported)
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Media type of a Docker schema 2 manifest list (not supported)
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Media type used for bundled files
pub const MEDIA_TYPE_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
/// Media type of the placeholder config blob
pub const MEDIA_TYPE_UNKNOWN_CONFIG: &str = "application/vnd.unknown.config.v1+json";

/// Annotation holding the file name of a layer
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
/// Annotation holding the manifest creation time
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";

pub type Annotations = BTreeMap<String, String>;

/// An immutable byte sequence with the file name it was read from or will be
/// written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub name: String,
    pub data: Bytes,
}

impl Blob {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Represents a descriptor for a content blob in an OCI registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    pub media_type: String,
    /// Digest of the referenced content
    pub digest: OciDigest,
    /// Size of the referenced content in bytes
    pub size: u64,
    /// Optional annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl Descriptor {
    /// Build the descriptor addressing `content`.
    ///
    /// Digest and size depend on the bytes only; the media type and
    /// annotations are attached as given.
    pub fn from_bytes(
        media_type: impl Into<String>,
        content: &[u8],
        annotations: Annotations,
    ) -> Result<Self> {
        let media_type = media_type.into();
        if media_type.trim().is_empty() {
            return Err(Error::Configuration("media type must not be empty".to_string()));
        }

        Ok(Self {
            media_type,
            digest: OciDigest::from_bytes(content),
            size: OciDigest::size_of(content),
            annotations,
        })
    }

    /// The file name recorded in the title annotation, if any.
    pub fn title(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TITLE).map(String::as_str)
    }
}

/// Annotations carrying only a title.
pub fn title_annotations(title: &str) -> Annotations {
    let mut annotations = Annotations::new();
    annotations.insert(ANNOTATION_TITLE.to_string(), title.to_string());
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_bytes() {
        let descriptor =
            Descriptor::from_bytes(MEDIA_TYPE_LAYER_TAR, b"hello", title_annotations("a.txt"))
                .unwrap();

        assert_eq!(descriptor.media_type, MEDIA_TYPE_LAYER_TAR);
        assert_eq!(descriptor.size, 5);
        assert_eq!(descriptor.digest, OciDigest::from_bytes(b"hello"));
        assert_eq!(descriptor.title(), Some("a.txt"));
    }

    #[test]
    fn test_same_content_same_descriptor() {
        let a = Descriptor::from_bytes(MEDIA_TYPE_LAYER_TAR, b"payload", title_annotations("x"))
            .unwrap();
        let b = Descriptor::from_bytes(MEDIA_TYPE_LAYER_TAR, b"payload", title_annotations("x"))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_media_type_rejected() {
        let err = Descriptor::from_bytes("", b"data", Annotations::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_json_shape() {
        let descriptor =
            Descriptor::from_bytes(MEDIA_TYPE_UNKNOWN_CONFIG, b"{}", Annotations::new()).unwrap();
        let value = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(value["mediaType"], MEDIA_TYPE_UNKNOWN_CONFIG);
        assert_eq!(value["size"], 2);
        assert_eq!(
            value["digest"],
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        // empty annotations are left out
        assert!(value.get("annotations").is_none());
    }
}

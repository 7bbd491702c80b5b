pub mod client;
pub mod credential;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod image_reference;
pub mod manifest;
pub mod materializer;
pub mod size;
pub mod transfer;

// Re-export main types for convenience
pub use client::{Client, ClientOptions, ClientSession};
pub use credential::{Credential, CredentialProvider, StaticCredentials};
pub use descriptor::{Blob, Descriptor};
pub use digest::OciDigest;
pub use error::{Direction, Error, Result};
pub use image_reference::RepositoryReference;
pub use manifest::{Artifact, ArtifactAssembler, BlobLayer, ConfigBlob, ImageManifest};
pub use materializer::LocalMaterializer;
pub use transfer::{Operation, Pull, PullOutcome, Push, PushOutcome, TransferStage};

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ocibundle::{Credential, OciDigest};

pub const USERNAME: &str = "bundler";
pub const PASSWORD: &str = "s3cret";

/// A request as seen by the test registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
}

/// Misbehavior the registry can be told to show.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Answer every upload completion with 400
    pub refuse_uploads: bool,
    /// Serve blobs with their first byte flipped
    pub corrupt_blobs: bool,
    /// Serve blobs without their last byte
    pub truncate_blobs: bool,
    /// Advertise a wrong Docker-Content-Digest for manifests
    pub misreport_manifest_digest: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    blobs: HashMap<String, Bytes>,
    // keyed by "<repository>@<tag or digest>"
    manifests: HashMap<String, (String, Bytes)>,
    uploads: HashMap<String, String>,
    requests: Vec<RecordedRequest>,
    next_upload: u64,
    faults: Faults,
}

/// In-memory registry speaking enough of the distribution API for a client.
#[derive(Debug, Clone, Default)]
pub struct TestRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TestRegistry {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    pub fn manifest(&self, repository: &str, reference: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(&format!("{}@{}", repository, reference))
            .map(|(_, content)| content.clone())
    }

    pub fn blob(&self, digest: &str) -> Option<Bytes> {
        self.state.lock().unwrap().blobs.get(digest).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.state.lock().unwrap().blobs.len()
    }

    pub fn inject(&self, faults: Faults) {
        self.state.lock().unwrap().faults = faults;
    }
}

// Helper function to start the registry server for testing
pub async fn start_test_server() -> (JoinHandle<()>, TestRegistry, String) {
    // Use a random available port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let registry = TestRegistry::default();
    let app = Router::new()
        .route("/v2/", any(dispatch))
        .route("/v2/{*path}", any(dispatch))
        .with_state(registry.clone());

    // Start server in a separate task
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (server, registry, addr.to_string())
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = Credential::new(USERNAME, PASSWORD).basic_auth();
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == expected)
        .unwrap_or(false)
}

// Repository names contain '/', so routing is done by hand
async fn dispatch(
    State(registry): State<TestRegistry>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let mut state = registry.state.lock().unwrap();
    state.requests.push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
    });

    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"test\"")],
        )
            .into_response();
    }

    let faults = state.faults;

    if path == "/v2/" {
        return StatusCode::OK.into_response();
    }

    let Some(rest) = path.strip_prefix("/v2/") else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // Blob upload operations
    if let Some(repository) = rest.strip_suffix("/blobs/uploads/") {
        if method != Method::POST {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        state.next_upload += 1;
        let uuid = format!("upload-{}", state.next_upload);
        state.uploads.insert(uuid.clone(), repository.to_string());
        return (
            StatusCode::ACCEPTED,
            [(
                header::LOCATION,
                format!("/v2/{}/blobs/uploads/{}", repository, uuid),
            )],
        )
            .into_response();
    }

    if let Some((_, uuid)) = rest.split_once("/blobs/uploads/") {
        if method != Method::PUT {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        if state.uploads.remove(uuid).is_none() {
            return StatusCode::NOT_FOUND.into_response();
        }
        if faults.refuse_uploads {
            return (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_INVALID").into_response();
        }
        let Some(expected) = query.get("digest") else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        let digest = OciDigest::from_bytes(&body).to_string();
        if *expected != digest {
            return (StatusCode::BAD_REQUEST, "DIGEST_INVALID").into_response();
        }
        state.blobs.insert(digest.clone(), body);
        return (StatusCode::CREATED, [("Docker-Content-Digest", digest)]).into_response();
    }

    // Blob operations
    if let Some((_, digest)) = rest.rsplit_once("/blobs/") {
        let Some(mut content) = state.blobs.get(digest).cloned() else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if method == Method::GET && !content.is_empty() {
            if faults.corrupt_blobs {
                let mut altered = content.to_vec();
                altered[0] ^= 0xff;
                content = Bytes::from(altered);
            }
            if faults.truncate_blobs {
                content = content.slice(..content.len() - 1);
            }
        }
        return match method {
            Method::HEAD => (
                StatusCode::OK,
                [(header::CONTENT_LENGTH, content.len().to_string())],
            )
                .into_response(),
            Method::GET => (StatusCode::OK, content).into_response(),
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    // Manifest operations
    if let Some((repository, reference)) = rest.rsplit_once("/manifests/") {
        let key = format!("{}@{}", repository, reference);
        return match method {
            Method::PUT => {
                let Ok(manifest) = serde_json::from_slice::<serde_json::Value>(&body) else {
                    return (StatusCode::BAD_REQUEST, "MANIFEST_INVALID").into_response();
                };

                // Every referenced blob must already be present
                let mut referenced = vec![manifest["config"]["digest"].clone()];
                if let Some(layers) = manifest["layers"].as_array() {
                    referenced.extend(layers.iter().map(|layer| layer["digest"].clone()));
                }
                for digest in referenced {
                    let known = digest
                        .as_str()
                        .map(|digest| state.blobs.contains_key(digest))
                        .unwrap_or(false);
                    if !known {
                        return (StatusCode::BAD_REQUEST, "MANIFEST_BLOB_UNKNOWN").into_response();
                    }
                }

                let content_type = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("application/vnd.oci.image.manifest.v1+json")
                    .to_string();
                let digest = OciDigest::from_bytes(&body).to_string();
                state.manifests.insert(
                    format!("{}@{}", repository, digest),
                    (content_type.clone(), body.clone()),
                );
                state.manifests.insert(key, (content_type, body));
                (StatusCode::CREATED, [("Docker-Content-Digest", digest)]).into_response()
            }
            Method::GET => match state.manifests.get(&key).cloned() {
                Some((content_type, content)) => {
                    let digest = if faults.misreport_manifest_digest {
                        OciDigest::from_bytes(b"some other manifest").to_string()
                    } else {
                        OciDigest::from_bytes(&content).to_string()
                    };
                    (
                        StatusCode::OK,
                        [
                            (header::CONTENT_TYPE.as_str(), content_type),
                            ("Docker-Content-Digest", digest),
                        ],
                        content,
                    )
                        .into_response()
                }
                None => StatusCode::NOT_FOUND.into_response(),
            },
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}

//! In-process OCI registry for tests
//!
//! Serves a single repository (`bundles`) with one tag (`v1-21-1001`) whose
//! manifest points at one layer. Optionally demands a bearer token issued
//! by its own `/token` endpoint against a username and password.

use crate::reference::ArtifactReference;
use crate::storage::{OCI_MANIFEST, compute_digest};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;

const REPOSITORY: &str = "bundles";
const TAG: &str = "v1-21-1001";
const TOKEN: &str = "test-token";

#[derive(Debug)]
struct Inner {
    addr: SocketAddr,
    manifest: Vec<u8>,
    layer_digest: String,
    served_blob: Vec<u8>,
    basic_auth: Option<String>,
    requests: AtomicUsize,
    token_requests: AtomicUsize,
}

impl Inner {
    /// 401 challenge when a bearer token is required and missing.
    fn challenge(&self, headers: &HeaderMap) -> Option<Response> {
        self.basic_auth.as_ref()?;
        let expected = format!("Bearer {TOKEN}");
        let presented = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
        if presented == Some(expected.as_str()) {
            return None;
        }
        let challenge = format!(
            r#"Bearer realm="http://{}/token",service="fake-registry""#,
            self.addr
        );
        Some((StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, challenge)]).into_response())
    }
}

#[derive(Debug)]
pub(crate) struct FakeRegistry {
    inner: Arc<Inner>,
    server: JoinHandle<()>,
}

impl FakeRegistry {
    pub(crate) async fn start(content: Vec<u8>) -> Self {
        Self::spawn(content, false, None).await
    }

    pub(crate) async fn start_corrupted(content: Vec<u8>) -> Self {
        Self::spawn(content, true, None).await
    }

    pub(crate) async fn start_with_token_auth(content: Vec<u8>, username: &str, password: &str) -> Self {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Self::spawn(content, false, Some(format!("Basic {encoded}"))).await
    }

    async fn spawn(content: Vec<u8>, corrupt: bool, basic_auth: Option<String>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let layer_digest = compute_digest(&content);
        let manifest = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": compute_digest(b"{}"),
                "size": 2
            },
            "layers": [{
                "mediaType": "application/vnd.oci.image.layer.v1.tar",
                "digest": layer_digest,
                "size": content.len()
            }]
        }))
        .unwrap();
        let served_blob = if corrupt {
            content.iter().map(|b| b ^ 0xff).collect()
        } else {
            content
        };

        let inner = Arc::new(Inner {
            addr,
            manifest,
            layer_digest,
            served_blob,
            basic_auth,
            requests: AtomicUsize::new(0),
            token_requests: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/v2/bundles/manifests/{reference}", get(manifest_handler))
            .route("/v2/bundles/blobs/{digest}", get(blob_handler))
            .route("/token", get(token_handler))
            .with_state(Arc::clone(&inner));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { inner, server }
    }

    pub(crate) fn host(&self) -> String {
        self.inner.addr.to_string()
    }

    pub(crate) fn reference(&self, tag: &str) -> ArtifactReference {
        ArtifactReference {
            registry: self.host(),
            repository: REPOSITORY.to_string(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// Requests received on the registry API, token endpoint excluded.
    pub(crate) fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn token_requests(&self) -> usize {
        self.inner.token_requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn manifest_handler(
    State(inner): State<Arc<Inner>>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Response {
    inner.requests.fetch_add(1, Ordering::SeqCst);
    if let Some(challenge) = inner.challenge(&headers) {
        return challenge;
    }
    if reference != TAG {
        return StatusCode::NOT_FOUND.into_response();
    }
    ([(header::CONTENT_TYPE, OCI_MANIFEST)], inner.manifest.clone()).into_response()
}

async fn blob_handler(
    State(inner): State<Arc<Inner>>,
    Path(digest): Path<String>,
    headers: HeaderMap,
) -> Response {
    inner.requests.fetch_add(1, Ordering::SeqCst);
    if let Some(challenge) = inner.challenge(&headers) {
        return challenge;
    }
    if digest != inner.layer_digest {
        return StatusCode::NOT_FOUND.into_response();
    }
    inner.served_blob.clone().into_response()
}

async fn token_handler(State(inner): State<Arc<Inner>>, headers: HeaderMap) -> Response {
    inner.token_requests.fetch_add(1, Ordering::SeqCst);
    let presented = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if presented.is_some() && presented == inner.basic_auth.as_deref() {
        Json(serde_json::json!({ "token": TOKEN })).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

//! Shared test utilities for mvirt-appstore integration tests.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mvirt_appstore::rest::{AppState, create_router};
use mvirt_appstore::{Catalog, Ingestor, RegistryClient, RegistryConfig, RetryPolicy, Store};
use reqwest::{Client, Response as ReqwestResponse};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Allocate an available port for testing.
pub fn allocate_port() -> u16 {
    portpicker::pick_unused_port().expect("No available port")
}

/// One tag of an image served by [`FakeRegistry`].
#[derive(Clone)]
pub struct FakeImage {
    pub digest: String,
    pub labels: HashMap<String, String>,
}

/// In-memory Docker registry v2 serving manifests and config blobs.
#[derive(Default)]
pub struct FakeRegistry {
    images: RwLock<BTreeMap<String, BTreeMap<String, FakeImage>>>,
}

impl FakeRegistry {
    /// Publish (or overwrite) `name:tag`.
    pub async fn publish(&self, name: &str, tag: &str, digest: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (format!("protos.installer.metadata.{}", k), v.to_string()))
            .collect();
        self.images.write().await.entry(name.to_string()).or_default().insert(
            tag.to_string(),
            FakeImage {
                digest: digest.to_string(),
                labels,
            },
        );
    }

    fn config_digest(tag: &str) -> String {
        format!("sha256:config-{}", tag)
    }

    fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/v2/_catalog", get(registry_catalog))
            .route("/v2/{name}/tags/list", get(registry_tags))
            .route("/v2/{name}/manifests/{reference}", get(registry_manifest))
            .route("/v2/{name}/blobs/{digest}", get(registry_blob))
            .with_state(self)
    }
}

async fn registry_catalog(State(registry): State<Arc<FakeRegistry>>) -> Json<serde_json::Value> {
    let images = registry.images.read().await;
    Json(json!({ "repositories": images.keys().collect::<Vec<_>>() }))
}

async fn registry_tags(
    State(registry): State<Arc<FakeRegistry>>,
    Path(name): Path<String>,
) -> Response {
    let images = registry.images.read().await;
    match images.get(&name) {
        Some(tags) => Json(json!({ "name": name, "tags": tags.keys().collect::<Vec<_>>() }))
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn registry_manifest(
    State(registry): State<Arc<FakeRegistry>>,
    Path((name, reference)): Path<(String, String)>,
) -> Response {
    let images = registry.images.read().await;
    let Some(image) = images.get(&name).and_then(|tags| tags.get(&reference)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 1024,
            "digest": FakeRegistry::config_digest(&reference),
        },
        "layers": [],
    });
    (
        [
            ("docker-content-digest", image.digest.clone()),
            (header::CONTENT_TYPE.as_str(), "application/vnd.docker.distribution.manifest.v2+json".to_string()),
        ],
        manifest.to_string(),
    )
        .into_response()
}

async fn registry_blob(
    State(registry): State<Arc<FakeRegistry>>,
    Path((name, digest)): Path<(String, String)>,
) -> Response {
    let images = registry.images.read().await;
    let image = images.get(&name).and_then(|tags| {
        tags.iter()
            .find(|(tag, _)| FakeRegistry::config_digest(tag) == digest)
            .map(|(_, image)| image)
    });
    match image {
        Some(image) => Json(json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": image.labels },
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Test server wrapper running the app store against a fake registry.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub registry: Arc<FakeRegistry>,
    pub catalog: Arc<Catalog>,
    _data_dir: TempDir,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    registry_shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    /// Spawn the app store with an on-disk catalog in a temp directory.
    pub async fn spawn() -> Self {
        // Fake registry on its own port
        let registry = Arc::new(FakeRegistry::default());
        let registry_addr: SocketAddr = format!("127.0.0.1:{}", allocate_port()).parse().unwrap();
        let registry_listener = TcpListener::bind(&registry_addr)
            .await
            .expect("Failed to bind registry");
        let (registry_shutdown_tx, registry_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let registry_router = registry.clone().router();
        tokio::spawn(async move {
            axum::serve(registry_listener, registry_router)
                .with_graceful_shutdown(async {
                    let _ = registry_shutdown_rx.await;
                })
                .await
                .expect("Registry error");
        });

        let data_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::new(data_dir.path())
            .await
            .expect("Failed to open store");
        let source = RegistryClient::new(&RegistryConfig {
            url: format!("http://{}", registry_addr),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .expect("Failed to create registry client");

        let catalog = Arc::new(Catalog::new(Arc::new(store)));
        let ingestor = Arc::new(Ingestor::new(
            Arc::new(source),
            catalog.clone(),
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
            },
        ));

        let app_state = Arc::new(AppState {
            catalog: catalog.clone(),
            ingestor,
        });
        let router = create_router(app_state);

        // Bind to port 0 to let the OS choose an available port
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
        let actual_addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        // Small delay to ensure servers are ready
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            addr: actual_addr,
            client: Client::new(),
            registry,
            catalog,
            _data_dir: data_dir,
            shutdown_tx,
            registry_shutdown_tx,
        }
    }

    /// Get base URL for the REST API.
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    /// Perform a GET request.
    pub async fn get(&self, path: &str) -> ReqwestResponse {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a POST request with JSON body.
    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a POST request with a raw body.
    pub async fn post_raw(&self, path: &str, body: &'static str) -> ReqwestResponse {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Poll `check` until it returns true or the timeout elapses.
    pub async fn wait_for<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Shutdown both servers.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.registry_shutdown_tx.send(());
    }
}

/// Registry notification for a single pushed tag.
pub fn push_event(repository: &str, tag: &str, digest: &str) -> serde_json::Value {
    json!({
        "events": [{
            "id": format!("{}-{}-{}", repository, tag, digest),
            "timestamp": "2026-01-12T10:00:00.000000000Z",
            "action": "push",
            "target": {
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "size": 708,
                "digest": digest,
                "length": 708,
                "repository": repository,
                "url": format!("http://docker-registry:5000/v2/{}/manifests/{}", repository, digest),
                "tag": tag,
            },
            "request": { "id": "req-1", "method": "PUT" },
            "actor": {},
        }]
    })
}

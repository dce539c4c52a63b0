//! binpatch Update Server
//!
//! Four read routes share one handler body; they differ only in whether the
//! response is a delta and whether it is wrapped in a signed envelope.

pub mod error;
pub mod handlers;
pub mod types;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::engine::config::ServerConfig;
use crate::engine::platform::PlatformSet;
use crate::engine::resolver::VersionResolver;
use crate::engine::store::ArtifactStore;

pub use error::{ApiError, ErrorResponse};
pub use types::{SignedUpdateEnvelope, UpdateCapabilities, UpdateQuery, UploadData, UploadResponse};

#[derive(Clone)]
pub struct ApiState {
    pub store: ArtifactStore,
    pub resolver: VersionResolver,
    pub platforms: Arc<PlatformSet>,
    /// Set once the startup dependency check passes
    pub ready: Arc<AtomicBool>,
    pub max_upload_bytes: usize,
}

impl ApiState {
    pub fn new(config: &ServerConfig) -> Self {
        let store = ArtifactStore::new(&config.base_dir);
        Self {
            resolver: VersionResolver::new(store.clone()),
            store,
            platforms: Arc::new(config.supported_platforms.clone()),
            ready: Arc::new(AtomicBool::new(false)),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Run the startup dependency check and publish the result to `/healthz`
    pub fn check_dependencies(&self) -> bool {
        let ready = self.store.check_ready();
        if ready {
            info!("Artifact store ready at {}", self.store.base_dir().display());
        } else {
            error!(
                "Artifact store {} is not a directory",
                self.store.base_dir().display()
            );
        }
        self.ready.store(ready, Ordering::Release);
        ready
    }
}

pub fn create_router(state: ApiState) -> Router {
    let upload_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(handlers::root_handler))
        .route("/healthz", get(handlers::health_handler))
        .route("/update/{name}", get(handlers::update_handler))
        .route("/patch-update/{name}", get(handlers::patch_update_handler))
        .route("/signed-update/{name}", get(handlers::signed_update_handler))
        .route(
            "/signed-patch-update/{name}",
            get(handlers::signed_patch_update_handler),
        )
        .route(
            "/upload/{name}",
            put(handlers::upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::diff;
    use crate::engine::platform::{Arch, Os, Platform};
    use crate::engine::store::{digest_path, signature_path, ArtifactKey, NewArtifact};
    use crate::engine::verify::sha256_hex;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::fs;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    fn linux() -> Platform {
        Platform::new(Arch::Amd64, Os::Linux)
    }

    fn setup() -> (TempDir, ApiState) {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            base_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let state = ApiState::new(&config);
        assert!(state.check_dependencies());
        (dir, state)
    }

    fn store(state: &ApiState, version: &str, data: &[u8], signature: Option<&[u8]>) {
        state
            .store
            .save_upload(&NewArtifact {
                key: ArtifactKey::new("app", version, linux()).unwrap(),
                data: data.to_vec(),
                signature: signature.map(|s| s.to_vec()),
                signature_type: signature.map(|_| "ecdsa".to_string()),
            })
            .unwrap();
    }

    async fn get(state: &ApiState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = create_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn put_upload(state: &ApiState, content_type: &str, body: String) -> (StatusCode, serde_json::Value) {
        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/upload/app")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_missing_parameters_named_in_order() {
        let (_dir, state) = setup();
        for (uri, field) in [
            ("/update/app?arch=amd64&os=linux", "version"),
            ("/update/app?version=v1&os=linux", "arch"),
            ("/update/app?version=v1&arch=amd64", "os"),
            ("/signed-patch-update/app", "version"),
        ] {
            let (status, body) = get(&state, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["message"], format!("Missing query parameter '{}'", field));
        }
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let (_dir, state) = setup();
        let (status, body) = get(&state, "/update/app?version=v1&arch=arm64&os=linux").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "unsupported_platform");

        let (status, _) = get(&state, "/update/app?version=v1&arch=sparc&os=linux").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_version_rejected() {
        let (_dir, state) = setup();
        let (status, _) = get(&state, "/update/app?version=..&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get(&state, "/update/my_app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_modified_reads_no_artifact() {
        let (dir, state) = setup();
        // a directory where the artifact should be: any read attempt would turn into a 500
        fs::create_dir(dir.path().join("app_v2_amd64linux")).unwrap();

        for route in ["update", "patch-update", "signed-update", "signed-patch-update"] {
            let uri = format!("/{}/app?version=v2&arch=amd64&os=linux", route);
            let (status, body) = get(&state, &uri).await;
            assert_eq!(status, StatusCode::NOT_MODIFIED, "route {}", route);
            assert!(body.is_empty());
        }
    }

    #[tokio::test]
    async fn test_full_update_streams_latest() {
        let (_dir, state) = setup();
        store(&state, "v1", b"binary one", None);
        store(&state, "v2", b"binary two", None);

        let (status, body) = get(&state, "/update/app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"binary two");
    }

    #[tokio::test]
    async fn test_patch_update_rebuilds_latest() {
        let (_dir, state) = setup();
        let v1: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
        let mut v2 = v1.clone();
        v2[1234] = 0xff;
        store(&state, "v1", &v1, None);
        store(&state, "v2", &v2, None);

        let (status, delta) = get(&state, "/patch-update/app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(diff::patch(&v1, &delta).unwrap(), v2);
    }

    #[tokio::test]
    async fn test_signed_update_envelope() {
        let (_dir, state) = setup();
        store(&state, "v1", b"one", Some(b"sig-one"));
        store(&state, "v2", b"two", Some(b"sig-two"));

        let (status, body) = get(&state, "/signed-update/app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::OK);
        let envelope: SignedUpdateEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.patch, b"two");
        assert_eq!(envelope.signature, b"sig-two");
        assert_eq!(envelope.sha256, sha256_hex(b"two"));
    }

    #[tokio::test]
    async fn test_signed_patch_digest_covers_full_artifact() {
        let (dir, state) = setup();
        store(&state, "v1", b"hello world, version one", None);
        store(&state, "v2", b"hello world, version two", Some(b"sig"));

        let (status, body) =
            get(&state, "/signed-patch-update/app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::OK);
        let envelope: SignedUpdateEnvelope = serde_json::from_slice(&body).unwrap();

        let sidecar = fs::read_to_string(digest_path(&dir.path().join("app_v2_amd64linux"))).unwrap();
        assert_eq!(envelope.sha256, sidecar);
        assert_ne!(envelope.sha256, sha256_hex(&envelope.patch));
        let rebuilt = diff::patch(b"hello world, version one", &envelope.patch).unwrap();
        assert_eq!(sha256_hex(&rebuilt), envelope.sha256);
    }

    #[tokio::test]
    async fn test_missing_sidecars_and_stale_digest_are_server_errors() {
        let (dir, state) = setup();
        store(&state, "v1", b"one", None);
        store(&state, "v2", b"two", None);

        let (status, _) = get(&state, "/signed-update/app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        store(&state, "v3", b"three", Some(b"sig"));
        fs::write(digest_path(&dir.path().join("app_v3_amd64linux")), sha256_hex(b"other")).unwrap();
        let (status, body) = get(&state, "/signed-update/app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "store_failure");
    }

    #[tokio::test]
    async fn test_diff_without_client_artifact_is_server_error() {
        let (_dir, state) = setup();
        store(&state, "v2", b"two", None);
        let (status, body) = get(&state, "/patch-update/app?version=v1&arch=amd64&os=linux").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "artifact_not_found");
    }

    #[tokio::test]
    async fn test_upload_signed_and_unsigned() {
        let (dir, state) = setup();
        let (status, json) = put_upload(
            &state,
            "application/json",
            r#"{"data":"aGVsbG8=","version":"v1","arch":"amd64","os":"linux"}"#.to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["message"],
            "uploaded unsigned application 'app' version v1 for OS linux and architecture amd64"
        );
        let path = dir.path().join("app_v1_amd64linux");
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert_eq!(fs::read_to_string(digest_path(&path)).unwrap(), sha256_hex(b"hello"));

        let (status, json) = put_upload(
            &state,
            "application/json; charset=utf-8",
            r#"{"data":"aGVsbG8=","version":"v2","arch":"amd64","os":"linux","signature":"AQID","signature-type":"ecdsa"}"#
                .to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["message"].as_str().unwrap().starts_with("uploaded signed"));
        assert_eq!(
            fs::read(signature_path(&dir.path().join("app_v2_amd64linux"))).unwrap(),
            vec![1, 2, 3]
        );

        let (status, json) = put_upload(
            &state,
            "application/json",
            r#"{"data":"aGVsbG8=","version":"v3","arch":"amd64","os":"linux","signature":"BAU=","signature-type":"ed25519"}"#
                .to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["message"].as_str().unwrap().starts_with("uploaded signed"));
        assert!(signature_path(&dir.path().join("app_v3_amd64linux")).exists());
    }

    #[tokio::test]
    async fn test_upload_rejections_carry_example() {
        let (_dir, state) = setup();
        let valid = r#"{"data":"aGVsbG8=","version":"v1","arch":"amd64","os":"linux"}"#;

        let (status, json) = put_upload(&state, "text/plain", valid.to_string()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["example"]["signature-type"], "ecdsa");

        let (status, _) = put_upload(&state, "application/json", "{not json".to_string()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = put_upload(
            &state,
            "application/json",
            r#"{"data":"aGVsbG8=","version":"v1","arch":"arm","os":"linux"}"#.to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = put_upload(&state, "application/json", valid.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) = put_upload(&state, "application/json", valid.to_string()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["message"].as_str().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let (_dir, state) = setup();
        let (status, body) = get(&state, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");

        let response = create_router(state.clone())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/healthz");

        let missing = ApiState::new(&ServerConfig {
            base_dir: std::path::PathBuf::from("/nonexistent/binpatch/store"),
            ..ServerConfig::default()
        });
        assert!(!missing.check_dependencies());
        let (status, body) = get(&missing, "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, b"Unavailable");
    }
}

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::atomic::Ordering;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};

use super::error::ApiError;
use super::types::{
    SignedUpdateEnvelope, UpdateCapabilities, UpdateQuery, UploadData, UploadResponse,
};
use super::ApiState;
use crate::engine::diff;
use crate::engine::platform::Platform;
use crate::engine::store::{validate_name, ArtifactKey, NewArtifact, StoreError};

/// Validated update request
struct UpdateRequest {
    current: ArtifactKey,
}

fn require(value: Option<String>, field: &'static str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingParameter(field))
}

fn parse_request(
    state: &ApiState,
    name: String,
    query: UpdateQuery,
) -> Result<UpdateRequest, ApiError> {
    let version = require(query.version, "version")?;
    let arch = require(query.arch, "arch")?;
    let os = require(query.os, "os")?;

    validate_name(&name)?;

    let platform = Platform::parse(&arch, &os)
        .filter(|p| state.platforms.contains(p))
        .ok_or(ApiError::UnsupportedPlatform { arch, os })?;

    Ok(UpdateRequest {
        current: ArtifactKey::new(name, version, platform)?,
    })
}

async fn compute_diff(old: Vec<u8>, new: Vec<u8>) -> Result<Vec<u8>, ApiError> {
    tokio::task::spawn_blocking(move || diff::diff(&old, &new))
        .await
        .map_err(|e| ApiError::DiffFailed(e.to_string()))?
        .map_err(|e| ApiError::DiffFailed(e.to_string()))
}

fn octet_stream(body: Body, len: Option<u64>) -> Response {
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response();
    if let Some(len) = len {
        response.headers_mut().insert(header::CONTENT_LENGTH, len.into());
    }
    response
}

/// Shared body of the four update routes
#[instrument(skip(state, query), fields(route = caps.route_prefix()))]
async fn serve_update(
    state: ApiState,
    name: String,
    query: UpdateQuery,
    caps: UpdateCapabilities,
) -> Result<Response, ApiError> {
    let request = parse_request(&state, name, query)?;
    let current = request.current;

    let resolver = state.resolver.clone();
    let lookup = current.clone();
    let latest_version = tokio::task::spawn_blocking(move || {
        resolver.resolve(&lookup.name, &lookup.platform, &lookup.version)
    })
    .await
    .map_err(|e| {
        ApiError::Store(StoreError::Io {
            path: state.store.base_dir().to_path_buf(),
            source: std::io::Error::other(e),
        })
    })?;

    if latest_version == current.version {
        debug!("{} is current", current);
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }
    let latest = current.with_version(&latest_version)?;
    info!("Serving {} to client on {}", latest, current.version);

    match (caps.include_diff, caps.include_signature) {
        (false, false) => {
            let (file, len) = state.store.open_artifact(&latest).await?;
            Ok(octet_stream(Body::from_stream(ReaderStream::new(file)), Some(len)))
        }
        (true, false) => {
            let old = state.store.read_artifact(&current).await?;
            let new = state.store.read_artifact(&latest).await?;
            let delta = compute_diff(old, new).await?;
            debug!("Delta for {} is {} bytes", latest, delta.len());
            let len = delta.len() as u64;
            Ok(octet_stream(Body::from(delta), Some(len)))
        }
        (false, true) => {
            let signed = state.store.read_signed(&latest).await?;
            Ok(Json(SignedUpdateEnvelope {
                patch: signed.data,
                signature: signed.signature,
                sha256: signed.digest,
            })
            .into_response())
        }
        (true, true) => {
            let old = state.store.read_artifact(&current).await?;
            let signed = state.store.read_signed(&latest).await?;
            let delta = compute_diff(old, signed.data).await?;
            Ok(Json(SignedUpdateEnvelope {
                patch: delta,
                signature: signed.signature,
                sha256: signed.digest,
            })
            .into_response())
        }
    }
}

fn respond(result: Result<Response, ApiError>) -> Response {
    result.unwrap_or_else(IntoResponse::into_response)
}

pub async fn update_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<UpdateQuery>,
) -> Response {
    respond(serve_update(state, name, query, UpdateCapabilities::FULL).await)
}

pub async fn patch_update_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<UpdateQuery>,
) -> Response {
    respond(serve_update(state, name, query, UpdateCapabilities::DIFF).await)
}

pub async fn signed_update_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<UpdateQuery>,
) -> Response {
    respond(serve_update(state, name, query, UpdateCapabilities::SIGNED_FULL).await)
}

pub async fn signed_patch_update_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<UpdateQuery>,
) -> Response {
    respond(serve_update(state, name, query, UpdateCapabilities::SIGNED_DIFF).await)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn upload_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    respond(upload(state, name, headers, body).await)
}

async fn upload(
    state: ApiState,
    name: String,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !is_json(&headers) {
        return Err(ApiError::UploadRejected(format!(
            "Content-Type: application/json required for application '{}'",
            name
        )));
    }
    let upload: UploadData = serde_json::from_slice(&body).map_err(|e| {
        ApiError::UploadRejected(format!(
            "Failed to parse upload for application '{}': {}",
            name, e
        ))
    })?;

    let platform = Platform::parse(&upload.arch, &upload.os)
        .filter(|p| state.platforms.contains(p))
        .ok_or_else(|| {
            ApiError::UploadRejected(format!(
                "Unsupported platform {}/{} for application '{}'",
                upload.arch, upload.os, name
            ))
        })?;
    let key = ArtifactKey::new(name.as_str(), upload.version.as_str(), platform)
        .map_err(|e| ApiError::UploadRejected(e.to_string()))?;

    let artifact = NewArtifact {
        key,
        data: upload.data,
        signature: upload.signature,
        signature_type: upload.signature_type,
    };
    let store = state.store.clone();
    let saved = tokio::task::spawn_blocking(move || store.save_upload(&artifact))
        .await
        .map_err(|e| {
            ApiError::Store(StoreError::Io {
                path: state.store.base_dir().to_path_buf(),
                source: std::io::Error::other(e),
            })
        })?
        .map_err(|e| match e {
            StoreError::Conflict { path } => ApiError::UploadRejected(format!(
                "Failed to save application '{}': {} already exists",
                name,
                path.display()
            )),
            other => ApiError::from(other),
        })?;

    let kind = if saved.signed { "signed" } else { "unsigned" };
    let message = format!(
        "uploaded {} application '{}' version {} for OS {} and architecture {}",
        kind, name, upload.version, upload.os, upload.arch
    );
    info!("{}", message);
    Ok(Json(UploadResponse { message }).into_response())
}

pub async fn health_handler(State(state): State<ApiState>) -> Response {
    if state.ready.load(Ordering::Acquire) {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Unavailable").into_response()
    }
}

pub async fn root_handler() -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/healthz")],
    )
        .into_response()
}

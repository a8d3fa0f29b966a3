//! OCI Distribution API routes.
//!
//! A single wildcard path is parsed by hand into repository name plus
//! operation, since repository names themselves contain `/` (e.g.
//! `library/alpine`) and don't fit axum's path-segment matching.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, head, patch, post, put},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

#[derive(Deserialize)]
pub struct UploadCompleteQuery {
    digest: Option<String>,
}

#[derive(Deserialize)]
pub struct MountQuery {
    mount: Option<String>,
    from: Option<String>,
}

async fn version_check() -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], "{}").into_response()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2/", get(version_check))
        .route("/v2/{*path}", get(handle_get_or_head_request))
        .route("/v2/{*path}", head(handle_get_or_head_request))
        .route("/v2/{*path}", put(handle_put_request))
        .route("/v2/{*path}", post(handle_post_request))
        .route("/v2/{*path}", patch(handle_patch_request))
}

enum RegistryRequest {
    Manifest { name: String, reference: String },
    Blob { name: String, digest: String },
    StartUpload { name: String },
    Upload { name: String, session_id: String },
}

fn parse_registry_path(path: &str) -> Option<RegistryRequest> {
    if let Some(idx) = path.rfind("/manifests/") {
        let name = &path[..idx];
        let reference = &path[idx + "/manifests/".len()..];
        return Some(RegistryRequest::Manifest { name: name.to_string(), reference: reference.to_string() });
    }

    if let Some(idx) = path.rfind("/blobs/uploads/") {
        let name = &path[..idx];
        let session_id = &path[idx + "/blobs/uploads/".len()..];
        return Some(if session_id.is_empty() {
            RegistryRequest::StartUpload { name: name.to_string() }
        } else {
            RegistryRequest::Upload { name: name.to_string(), session_id: session_id.to_string() }
        });
    }

    if let Some(idx) = path.rfind("/blobs/") {
        let name = &path[..idx];
        let digest = &path[idx + "/blobs/".len()..];
        return Some(RegistryRequest::Blob { name: name.to_string(), digest: digest.to_string() });
    }

    None
}

fn header_str(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

async fn handle_get_or_head_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: axum::http::Method,
) -> Result<Response, ApiError> {
    let req = parse_registry_path(&path).ok_or_else(|| ApiError::NotFound(path.clone()))?;

    match req {
        RegistryRequest::Manifest { name, reference } => {
            debug!(%name, %reference, "manifest request");
            let (data, content_type, digest) = state.registry.get_manifest(&name, &reference).await?;
            if method == axum::http::Method::HEAD {
                let mut response = StatusCode::OK.into_response();
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, header_str(&content_type));
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(data.len() as u64));
                headers.insert("Docker-Content-Digest", header_str(&digest));
                Ok(response)
            } else {
                let mut response = (StatusCode::OK, data).into_response();
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, header_str(&content_type));
                headers.insert("Docker-Content-Digest", header_str(&digest));
                Ok(response)
            }
        }
        RegistryRequest::Blob { name, digest } => {
            if method == axum::http::Method::HEAD {
                debug!(%digest, "HEAD blob");
                if !state.registry.blob_exists(&name, &digest).await? {
                    return Err(ApiError::NotFound(digest));
                }
                let size = state.registry.blob_size(&digest).await.unwrap_or(0);
                let mut response = StatusCode::OK.into_response();
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
                headers.insert("Docker-Content-Digest", header_str(&digest));
                Ok(response)
            } else {
                debug!(%digest, "GET blob");
                let stream = state.registry.get_blob_stream(&name, &digest).await?;
                let size = state.registry.blob_size(&digest).await.ok();

                let body = axum::body::Body::from_stream(stream);
                let mut response = (StatusCode::OK, body).into_response();
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
                if let Some(size) = size {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
                }
                headers.insert("Docker-Content-Digest", header_str(&digest));
                Ok(response)
            }
        }
        RegistryRequest::Upload { name, session_id } => {
            debug!(%session_id, "GET upload status");
            let bytes_received = state
                .registry
                .upload_status(&session_id)
                .ok_or_else(|| ApiError::NotFound(format!("upload session: {session_id}")))?;
            let location = format!("/v2/{name}/blobs/uploads/{session_id}");
            let range = format!("0-{bytes_received}");
            let mut response = StatusCode::NO_CONTENT.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, header_str(&location));
            headers.insert("Docker-Upload-UUID", header_str(&session_id));
            headers.insert(header::RANGE, header_str(&range));
            Ok(response)
        }
        RegistryRequest::StartUpload { .. } => Err(ApiError::MethodNotAllowed),
    }
}

async fn handle_put_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<UploadCompleteQuery>,
    _headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = parse_registry_path(&path).ok_or_else(|| ApiError::NotFound(path.clone()))?;

    match req {
        RegistryRequest::Manifest { name, reference } => {
            debug!(%name, %reference, "PUT manifest");
            let digest = state.registry.put_manifest(&name, &reference, body).await?;
            let location = format!("/v2/{name}/manifests/{digest}");
            let mut response = StatusCode::CREATED.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, header_str(&location));
            headers.insert(header::CONTENT_TYPE, header_str(OCI_MANIFEST_MEDIA_TYPE));
            headers.insert("Docker-Content-Digest", header_str(&digest));
            Ok(response)
        }
        RegistryRequest::Upload { name, session_id } => {
            let digest = query.digest.ok_or_else(|| ApiError::BadRequest("missing digest parameter".to_string()))?;
            debug!(%session_id, %digest, "PUT upload completion");
            if !body.is_empty() {
                let offset = state.registry.upload_status(&session_id).unwrap_or(0);
                state.registry.append_chunk(&session_id, offset, body).await?;
            }
            state.registry.commit_upload(&session_id, Some(&digest)).await?;
            let location = format!("/v2/{name}/blobs/{digest}");
            let mut response = StatusCode::CREATED.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, header_str(&location));
            headers.insert("Docker-Content-Digest", header_str(&digest));
            Ok(response)
        }
        _ => Err(ApiError::MethodNotAllowed),
    }
}

async fn handle_post_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<MountQuery>,
) -> Result<Response, ApiError> {
    let req = parse_registry_path(&path).ok_or_else(|| ApiError::NotFound(path.clone()))?;

    match req {
        RegistryRequest::StartUpload { name } => {
            if let (Some(mount_digest), Some(_from)) = (query.mount, query.from) {
                debug!(digest = %mount_digest, "blob mount request");
                // Storage is content-addressed, so mounting from another
                // repository is just confirming the blob is already present.
                if state.registry.blob_exists(&name, &mount_digest).await? {
                    let location = format!("/v2/{name}/blobs/{mount_digest}");
                    let mut response = StatusCode::CREATED.into_response();
                    let headers = response.headers_mut();
                    headers.insert(header::LOCATION, header_str(&location));
                    headers.insert("Docker-Content-Digest", header_str(&mount_digest));
                    return Ok(response);
                }
            }

            debug!(%name, "starting upload session");
            let session_id = state.registry.start_upload().await?;
            let location = format!("/v2/{name}/blobs/uploads/{session_id}");
            let mut response = StatusCode::ACCEPTED.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, header_str(&location));
            headers.insert("Docker-Upload-UUID", header_str(&session_id));
            headers.insert(header::RANGE, HeaderValue::from_static("0-0"));
            Ok(response)
        }
        _ => Err(ApiError::MethodNotAllowed),
    }
}

async fn handle_patch_request(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = parse_registry_path(&path).ok_or_else(|| ApiError::NotFound(path.clone()))?;

    match req {
        RegistryRequest::Upload { name, session_id } => {
            debug!(%session_id, len = body.len(), "PATCH upload chunk");
            let offset = state.registry.upload_status(&session_id).unwrap_or(0);
            let new_size = state.registry.append_chunk(&session_id, offset, body).await?;
            let location = format!("/v2/{name}/blobs/uploads/{session_id}");
            let range = format!("0-{}", new_size.saturating_sub(1));
            let mut response = StatusCode::ACCEPTED.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, header_str(&location));
            headers.insert("Docker-Upload-UUID", header_str(&session_id));
            headers.insert(header::RANGE, header_str(&range));
            Ok(response)
        }
        _ => Err(ApiError::MethodNotAllowed),
    }
}

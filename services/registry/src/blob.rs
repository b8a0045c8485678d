//! Blob operations for the registry
//!
//! Only config blobs exist. Layers are metadata in manifests and are never
//! served.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::error::RegistryResult;
use crate::manifest::DOCKER_CONTENT_DIGEST;
use crate::storage::RegistryStore;

/// Router for blob operations
pub fn router() -> Router<RegistryStore> {
    Router::new().route("/v2/{name}/blobs/{digest}", get(get_blob).head(head_blob))
}

/// Get a blob
async fn get_blob(
    State(store): State<RegistryStore>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let data = store.blob(&name, &digest)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.to_string()),
            (DOCKER_CONTENT_DIGEST, digest),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response())
}

/// Check if a blob exists
async fn head_blob(
    State(store): State<RegistryStore>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let data = store.blob(&name, &digest)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.to_string()),
            (DOCKER_CONTENT_DIGEST, digest),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
    )
        .into_response())
}

//! Manifest operations for the registry

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::digest::digest;
use crate::error::{RegistryError, RegistryResult};
use crate::oci::ManifestKind;
use crate::paginate::{PageQuery, paginate};
use crate::storage::RegistryStore;

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");

/// Router for manifest operations
pub fn router() -> Router<RegistryStore> {
    Router::new()
        .route(
            "/v2/{name}/manifests/{reference}",
            get(get_manifest)
                .head(head_manifest)
                .delete(delete_manifest),
        )
        .route("/v2/{name}/tags/list", get(list_tags))
}

/// Media types listed in every `Accept` header, split on commas with parameters dropped.
///
/// `None` when the request carries no `Accept` header at all.
fn accepted(headers: &HeaderMap) -> Option<Vec<String>> {
    let mut values = headers.get_all(header::ACCEPT).iter().peekable();
    values.peek()?;

    Some(
        values
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|token| token.split(';').next().unwrap_or_default().trim().to_owned())
            .filter(|token| !token.is_empty())
            .collect(),
    )
}

/// Pick the media type to serve a manifest of `kind` as.
///
/// The canonical type wins when accepted. Otherwise the other format of the
/// same shape is served by rewriting the body's `mediaType`, which a real
/// registry would never do: there the two would have different digests.
pub fn negotiate(kind: ManifestKind, accepted: Option<&[String]>) -> Option<&'static str> {
    let canonical = kind.media_type();
    let Some(accepted) = accepted else {
        return Some(canonical);
    };

    if accepted.iter().any(|t| t == canonical || t == "*/*") {
        return Some(canonical);
    }

    let sibling = kind.sibling_media_type();
    accepted.iter().any(|t| t == sibling).then_some(sibling)
}

/// A manifest resolved, negotiated and serialized for one request.
#[derive(Debug)]
struct Served {
    digest: String,
    media_type: &'static str,
    body: Vec<u8>,
    etag: String,
}

impl Served {
    fn headers(&self) -> [(HeaderName, String); 3] {
        [
            (header::CONTENT_TYPE, self.media_type.to_owned()),
            (DOCKER_CONTENT_DIGEST, self.digest.clone()),
            (header::ETAG, self.etag.clone()),
        ]
    }
}

fn serve(
    store: &RegistryStore,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
) -> RegistryResult<Served> {
    let (digest_key, manifest) = store.manifest(name, reference)?;
    let kind = manifest.kind();

    let media_type = negotiate(kind, accepted(headers).as_deref())
        .ok_or_else(|| RegistryError::Unsupported(format!("{name}:{reference} ({kind:?})")))?;

    let body = if media_type == manifest.body_media_type() {
        manifest.to_body(None)?
    } else {
        tracing::debug!(
            from = manifest.body_media_type(),
            to = media_type,
            "rewriting manifest media type"
        );
        manifest.to_body(Some(media_type))?
    };

    Ok(Served {
        etag: digest(&body),
        digest: digest_key,
        media_type,
        body,
    })
}

fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"'))
}

/// Get a manifest
async fn get_manifest(
    State(store): State<RegistryStore>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let served = serve(&store, &name, &reference, &headers)?;

    if if_none_match(&headers) == Some(served.etag.as_str()) {
        return Ok((StatusCode::NOT_MODIFIED, served.headers()).into_response());
    }

    Ok((StatusCode::OK, served.headers(), served.body).into_response())
}

/// Check if a manifest exists
async fn head_manifest(
    State(store): State<RegistryStore>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let served = serve(&store, &name, &reference, &headers)?;

    Ok((
        StatusCode::OK,
        served.headers(),
        [(header::CONTENT_LENGTH, served.body.len().to_string())],
    )
        .into_response())
}

/// Delete a manifest
async fn delete_manifest(
    State(store): State<RegistryStore>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> RegistryResult<StatusCode> {
    let served = serve(&store, &name, &reference, &headers)?;

    store.delete_manifest(&name, &served.digest).await?;
    Ok(StatusCode::ACCEPTED)
}

/// List tags for a repository
async fn list_tags(
    State(store): State<RegistryStore>,
    Path(name): Path<String>,
    Query(query): Query<PageQuery>,
) -> RegistryResult<Response> {
    let tags = store.tags(&name)?;
    let page = paginate(tags, &query, &format!("/v2/{name}/tags/list"))?;

    Ok((
        page.headers(),
        Json(TagList {
            name,
            tags: page.items,
        }),
    )
        .into_response())
}

/// Tag list response
#[derive(Debug, serde::Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

//! API server builder and router

use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::database::Template;
use crate::error::{RegistryError, RegistryResult};
use crate::storage::RegistryStore;

/// Registry builder for configuring and creating the registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    store: RegistryStore,
    throttle: Option<Duration>,
}

impl RegistryBuilder {
    /// Create a new registry builder serving `store`
    pub fn new(store: RegistryStore) -> Self {
        Self {
            store,
            throttle: None,
        }
    }

    /// Delay every request except the version check by a fixed duration
    pub fn throttle(mut self, delay: Duration) -> Self {
        self.throttle = Some(delay).filter(|d| !d.is_zero());
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let mut protected = Router::new()
            .route("/v2/_catalog", get(crate::catalog::list_repositories))
            .route("/v2/push", post(push))
            .merge(crate::manifest::router())
            .merge(crate::blob::router())
            .route_layer(middleware::from_fn_with_state(
                self.store.clone(),
                authenticate,
            ));

        if let Some(delay) = self.throttle {
            tracing::info!(?delay, "throttling requests");
            protected = protected.route_layer(middleware::from_fn_with_state(delay, throttle));
        }

        Router::new()
            .route("/v2/", get(api_version_check))
            .merge(protected)
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static("docker-distribution-api-version"),
                HeaderValue::from_static("registry/2.0"),
            ))
            .with_state(self.store)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// Decode a Basic authorization header into username and password.
///
/// The scheme name is case-insensitive.
fn basic_credentials(value: &HeaderValue) -> Option<(String, String)> {
    let (scheme, encoded) = value.to_str().ok()?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_owned(), password.to_owned()))
}

/// Reject requests without a matching Basic credential, when credentials are configured
async fn authenticate(
    State(store): State<RegistryStore>,
    request: Request,
    next: Next,
) -> Result<Response, RegistryError> {
    if !store.auth_enabled() {
        return Ok(next.run(request).await);
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(basic_credentials)
        .is_some_and(|(username, password)| store.check_credentials(&username, &password));

    if !authorized {
        tracing::warn!(uri = %request.uri(), "rejected unauthenticated request");
        return Err(RegistryError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// Simulate network latency
async fn throttle(State(delay): State<Duration>, request: Request, next: Next) -> Response {
    tokio::time::sleep(delay).await;
    next.run(request).await
}

/// Generate and add the repositories described by a template
async fn push(State(store): State<RegistryStore>, body: Bytes) -> RegistryResult<StatusCode> {
    let template: Template = serde_json::from_slice(&body)
        .map_err(|err| RegistryError::InvalidRequest(format!("template: {err}")))?;

    store.push(&template).await.map_err(|err| match err {
        RegistryError::InvalidRequest(_) => err,
        other => RegistryError::InvalidRequest(other.to_string()),
    })?;

    Ok(StatusCode::CREATED)
}

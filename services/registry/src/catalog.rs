//! Repository catalog

use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};

use crate::error::RegistryResult;
use crate::paginate::{PageQuery, paginate};
use crate::storage::RegistryStore;

const CATALOG_PATH: &str = "/v2/_catalog";

#[derive(Debug, serde::Serialize)]
struct Catalog {
    repositories: Vec<String>,
}

/// List repositories, sorted by name
pub(crate) async fn list_repositories(
    State(store): State<RegistryStore>,
    Query(query): Query<PageQuery>,
) -> RegistryResult<Response> {
    let page = paginate(store.catalog(), &query, CATALOG_PATH)?;

    Ok((
        page.headers(),
        Json(Catalog {
            repositories: page.items,
        }),
    )
        .into_response())
}

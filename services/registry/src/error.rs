//! Error types for the registry

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced to registry clients
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Repository not found
    #[error("repository name not known to registry: {0}")]
    NameUnknown(String),

    /// Manifest not found
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// Blob not found
    #[error("blob unknown to registry: {0}")]
    BlobUnknown(String),

    /// Reference is not a digest
    #[error("invalid digest: {0}")]
    DigestInvalid(String),

    /// Page size is not a positive integer
    #[error("invalid number of results requested: {0}")]
    PaginationNumberInvalid(String),

    /// No acceptable representation
    #[error("the operation is unsupported: no acceptable media type for {0}")]
    Unsupported(String),

    /// Missing or wrong credentials
    #[error("authentication required")]
    Unauthorized,

    /// Push payload could not be applied
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Mutation refused because it would break the graph
    #[error("requested access to the resource is denied: {0}")]
    Denied(String),

    /// The mutated database failed validation
    #[error(transparent)]
    Validation(#[from] crate::validate::ValidationError),

    /// The generator rejected a template
    #[error(transparent)]
    Generate(#[from] crate::generate::GenerateError),

    /// Persisting the document failed
    #[error(transparent)]
    Persist(#[from] crate::persist::PersistError),

    /// Serializing a stored document failed
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::NameUnknown(_)
            | RegistryError::ManifestUnknown(_)
            | RegistryError::BlobUnknown(_) => StatusCode::NOT_FOUND,
            RegistryError::DigestInvalid(_)
            | RegistryError::PaginationNumberInvalid(_)
            | RegistryError::InvalidRequest(_)
            | RegistryError::Generate(_) => StatusCode::BAD_REQUEST,
            RegistryError::Unsupported(_) => StatusCode::NOT_ACCEPTABLE,
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::Denied(_) => StatusCode::CONFLICT,
            RegistryError::Validation(_)
            | RegistryError::Persist(_)
            | RegistryError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::NameUnknown(_) => "NAME_UNKNOWN",
            RegistryError::ManifestUnknown(_) => "MANIFEST_UNKNOWN",
            RegistryError::BlobUnknown(_) => "BLOB_UNKNOWN",
            RegistryError::DigestInvalid(_) => "DIGEST_INVALID",
            RegistryError::PaginationNumberInvalid(_) => "PAGINATION_NUMBER_INVALID",
            RegistryError::Unsupported(_) => "UNSUPPORTED",
            RegistryError::Unauthorized => "UNAUTHORIZED",
            RegistryError::InvalidRequest(_) | RegistryError::Generate(_) => "INVALID_REQUEST",
            RegistryError::Denied(_) => "DENIED",
            RegistryError::Validation(_)
            | RegistryError::Persist(_)
            | RegistryError::Serialize(_) => "UNKNOWN",
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(code, "{message}");
        } else {
            tracing::debug!(code, "{message}");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        let mut response = (status, axum::Json(body)).into_response();
        if matches!(self, RegistryError::Unauthorized) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="registry-sim""#),
            );
        }
        response
    }
}

//! # Container Registry Simulator
//!
//! A read-mostly container registry that speaks the
//! [OCI Distribution](https://github.com/opencontainers/distribution-spec)
//! pull API, backed by a synthetic database instead of real images.
//!
//! ## Features
//!
//! - Generate a consistent registry database from a small template
//! - Serve catalogs, tag lists, manifests and config blobs with pagination,
//!   content negotiation and conditional requests
//! - Push more generated repositories and delete manifests at runtime
//! - Validate database documents, optionally recomputing every digest
//! - Persist the database as a single JSON document
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use registry_sim::{FileDocument, RegistryBuilder, RegistryStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let document = Arc::new(FileDocument::new("registry.json"));
//! let store = RegistryStore::open(document).await?;
//! let registry = RegistryBuilder::new(store).build();
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod catalog;
#[cfg(feature = "cli")]
pub mod config;
mod database;
pub mod digest;
mod error;
mod generate;
mod manifest;
pub mod oci;
mod paginate;
mod persist;
mod presets;
mod storage;
pub mod validate;

pub use api::RegistryBuilder;
pub use database::{Credential, Database, Repository, RepositoryTemplate, TagRef, Template};
pub use error::{RegistryError, RegistryResult};
pub use generate::{GenerateError, Generator, generate};
pub use manifest::negotiate;
pub use paginate::{Page, PageQuery, paginate};
pub use persist::{DocumentStore, FileDocument, MemoryDocument, PersistError};
pub use storage::{DeleteSummary, OpenError, RegistryStore};
pub use validate::ValidationError;

//! Whole-document persistence
//!
//! The registry state is a single JSON document, read once at startup and
//! replaced in full after every mutation. Backends only move bytes.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;

/// Error reading or writing the persisted document.
#[derive(Debug, thiserror::Error)]
#[error("{backend} document store: {context}")]
pub struct PersistError {
    backend: &'static str,
    context: String,
    #[source]
    source: std::io::Error,
}

impl PersistError {
    fn new(backend: &'static str, context: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            backend,
            context: context.into(),
            source,
        }
    }
}

/// Somewhere to keep the registry document.
#[async_trait::async_trait]
pub trait DocumentStore: fmt::Debug + Send + Sync {
    /// A short name for logs.
    fn name(&self) -> &'static str;

    /// Read the document. `None` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<Vec<u8>>, PersistError>;

    /// Replace the document.
    async fn save(&self, document: &[u8]) -> Result<(), PersistError>;
}

/// A document kept in a file on the local filesystem.
///
/// Saves write a sibling temporary file and rename it over the target, so a
/// reader never sees a partially written document.
#[derive(Debug, Clone)]
pub struct FileDocument {
    path: Utf8PathBuf,
}

impl FileDocument {
    /// Keep the document at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The document path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn staging_path(&self) -> Utf8PathBuf {
        let mut name = self.path.file_name().unwrap_or("database.json").to_owned();
        name.push_str(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl DocumentStore for FileDocument {
    fn name(&self) -> &'static str {
        "file"
    }

    #[tracing::instrument(skip(self), fields(path = %self.path))]
    async fn load(&self) -> Result<Option<Vec<u8>>, PersistError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => {
                tracing::debug!(bytes = data.len(), "read document");
                Ok(Some(data))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(PersistError::new(self.name(), format!("reading {}", self.path), err)),
        }
    }

    #[tracing::instrument(skip(self, document), fields(path = %self.path, bytes = document.len()))]
    async fn save(&self, document: &[u8]) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| PersistError::new(self.name(), format!("creating {parent}"), err))?;
        }

        let staging = self.staging_path();
        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|err| PersistError::new(self.name(), format!("creating {staging}"), err))?;
        file.write_all(document)
            .await
            .map_err(|err| PersistError::new(self.name(), format!("writing {staging}"), err))?;
        file.sync_all()
            .await
            .map_err(|err| PersistError::new(self.name(), format!("syncing {staging}"), err))?;
        drop(file);

        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| {
                PersistError::new(self.name(), format!("replacing {}", self.path), err)
            })?;
        Ok(())
    }
}

/// A document kept in memory, for tests and throwaway servers.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    data: RwLock<Option<Vec<u8>>>,
}

impl MemoryDocument {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds a document.
    pub fn with_document(document: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(Some(document)),
        }
    }

    /// The most recently saved document.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocument {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self.data.read().clone())
    }

    async fn save(&self, document: &[u8]) -> Result<(), PersistError> {
        *self.data.write() = Some(document.to_vec());
        Ok(())
    }
}

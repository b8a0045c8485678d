//! The registry store shared by every handler
//!
//! Reads work on an immutable snapshot of the database. Mutations are
//! serialized: each one takes the writer lock, applies its change to a copy,
//! validates the copy, persists it, and only then publishes it. A mutation
//! that fails at any step leaves the published database untouched.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;

use crate::database::{Database, Template};
use crate::digest::is_digest_reference;
use crate::error::{RegistryError, RegistryResult};
use crate::generate::Generator;
use crate::oci::StoredManifest;
use crate::persist::{DocumentStore, PersistError};
use crate::validate::{self, ValidationError};

/// Error opening a store.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The document could not be read
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// The document is not a valid database
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// What a manifest delete removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Digest of the removed manifest
    pub digest: String,
    /// Tags that pointed at it
    pub tags: Vec<String>,
    /// Config blobs no longer referenced by any manifest
    pub blobs: Vec<String>,
}

/// Registry state backed by a persisted document.
#[derive(Clone, Debug)]
pub struct RegistryStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    database: ArcSwap<Database>,
    writer: Mutex<StdRng>,
    document: Arc<dyn DocumentStore>,
}

impl RegistryStore {
    /// Create a store around an in-memory database, validating it first.
    pub fn new(
        database: Database,
        document: Arc<dyn DocumentStore>,
    ) -> Result<Self, ValidationError> {
        validate::validate(&database)?;
        Ok(Self {
            inner: Arc::new(Inner {
                database: ArcSwap::from_pointee(database),
                writer: Mutex::new(StdRng::from_os_rng()),
                document,
            }),
        })
    }

    /// Load and validate the persisted document. A missing document yields an empty registry.
    ///
    /// Every stored manifest and blob must still hash to its key.
    #[tracing::instrument(skip(document), fields(backend = document.name()))]
    pub async fn open(document: Arc<dyn DocumentStore>) -> Result<Self, OpenError> {
        let database = match document.load().await? {
            Some(bytes) => validate::load_document(&bytes)?,
            None => {
                tracing::info!("no persisted document, starting empty");
                Database::default()
            }
        };

        tracing::info!(
            repositories = database.repositories.len(),
            manifests = database.manifests.len(),
            blobs = database.blobs.len(),
            "loaded registry document"
        );
        Ok(Self::new(database, document)?)
    }

    /// Replace the random source used by push with a seeded one.
    pub async fn reseed(&self, seed: u64) {
        *self.inner.writer.lock().await = StdRng::seed_from_u64(seed);
    }

    /// The current database.
    pub fn snapshot(&self) -> Arc<Database> {
        self.inner.database.load_full()
    }

    /// Whether any credentials are configured.
    pub fn auth_enabled(&self) -> bool {
        !self.inner.database.load().auth.is_empty()
    }

    /// Whether a username and password match a configured credential.
    pub fn check_credentials(&self, username: &str, password: &str) -> bool {
        self.inner
            .database
            .load()
            .auth
            .iter()
            .any(|c| c.username == username && c.password == password)
    }

    /// All repository names, sorted.
    pub fn catalog(&self) -> Vec<String> {
        self.inner.database.load().repository_names()
    }

    /// Tag names of a repository, sorted.
    pub fn tags(&self, name: &str) -> RegistryResult<Vec<String>> {
        self.inner
            .database
            .load()
            .tag_names(name)
            .ok_or_else(|| RegistryError::NameUnknown(name.to_owned()))
    }

    /// Resolve a tag or digest to the stored manifest.
    pub fn manifest(
        &self,
        name: &str,
        reference: &str,
    ) -> RegistryResult<(String, StoredManifest)> {
        let db = self.inner.database.load();
        if !db.has_repository(name) {
            return Err(RegistryError::NameUnknown(name.to_owned()));
        }

        let digest = if is_digest_reference(reference) {
            reference
        } else {
            db.resolve_tag(name, reference)
                .ok_or_else(|| RegistryError::ManifestUnknown(format!("{name}:{reference}")))?
        };

        db.manifests
            .get(digest)
            .map(|manifest| (digest.to_owned(), manifest.clone()))
            .ok_or_else(|| RegistryError::ManifestUnknown(format!("{name}@{digest}")))
    }

    /// The serialized config blob for a digest.
    pub fn blob(&self, name: &str, digest: &str) -> RegistryResult<Vec<u8>> {
        let db = self.inner.database.load();
        if !db.has_repository(name) {
            return Err(RegistryError::NameUnknown(name.to_owned()));
        }
        if !is_digest_reference(digest) {
            return Err(RegistryError::DigestInvalid(digest.to_owned()));
        }

        let blob = db
            .blobs
            .get(digest)
            .ok_or_else(|| RegistryError::BlobUnknown(digest.to_owned()))?;
        Ok(serde_json::to_vec(blob)?)
    }

    /// Generate everything a template describes into the live registry.
    #[tracing::instrument(skip_all, fields(repositories = template.repositories.len()))]
    pub async fn push(&self, template: &Template) -> RegistryResult<()> {
        self.mutate(|db, rng| {
            Generator::new(rng).apply(db, template)?;
            Ok(())
        })
        .await?;

        tracing::info!("push applied");
        Ok(())
    }

    /// Remove a manifest, the tags in `name` that point at it, and any orphaned config blobs.
    #[tracing::instrument(skip(self))]
    pub async fn delete_manifest(&self, name: &str, digest: &str) -> RegistryResult<DeleteSummary> {
        let summary = self
            .mutate(|db, _| remove_manifest(db, name, digest))
            .await?;

        tracing::info!(
            tags = ?summary.tags,
            blobs = summary.blobs.len(),
            "deleted manifest"
        );
        Ok(summary)
    }

    async fn mutate<T, F>(&self, apply: F) -> RegistryResult<T>
    where
        F: FnOnce(&mut Database, &mut StdRng) -> RegistryResult<T> + Send,
    {
        let mut rng = self.inner.writer.lock().await;

        let mut next = Database::clone(&self.inner.database.load());
        let output = apply(&mut next, &mut *rng)?;
        validate::validate(&next)?;

        let document = next.to_document()?;
        self.inner.document.save(&document).await?;
        self.inner.database.store(Arc::new(next));

        Ok(output)
    }
}

fn remove_manifest(db: &mut Database, name: &str, digest: &str) -> RegistryResult<DeleteSummary> {
    if !db.has_repository(name) {
        return Err(RegistryError::NameUnknown(name.to_owned()));
    }
    if !db.manifests.contains_key(digest) {
        return Err(RegistryError::ManifestUnknown(format!("{name}@{digest}")));
    }

    if let Some(parent) = db
        .manifests
        .iter()
        .find(|(key, manifest)| {
            key.as_str() != digest && manifest.children().iter().any(|c| c.digest == digest)
        })
        .map(|(key, _)| key)
    {
        return Err(RegistryError::Denied(format!(
            "{digest} is a platform manifest of {parent}"
        )));
    }

    if let Some((other, tag)) = db
        .tags
        .iter()
        .filter(|(repository, _)| repository.as_str() != name)
        .flat_map(|(repository, tags)| tags.iter().map(move |t| (repository, t)))
        .find(|(_, t)| t.digest == digest)
    {
        return Err(RegistryError::Denied(format!(
            "{digest} is still tagged as {other}:{}",
            tag.tag
        )));
    }

    db.manifests.remove(digest);

    let mut tags = Vec::new();
    if let Some(entries) = db.tags.get_mut(name) {
        entries.retain(|entry| {
            if entry.digest == digest {
                tags.push(entry.tag.clone());
                false
            } else {
                true
            }
        });
    }

    let referenced: HashSet<String> = validate::referenced_blobs(db)
        .into_iter()
        .map(str::to_owned)
        .collect();
    let blobs: Vec<String> = db
        .blobs
        .keys()
        .filter(|key| !referenced.contains(key.as_str()))
        .cloned()
        .collect();
    for blob in &blobs {
        db.blobs.remove(blob);
    }

    Ok(DeleteSummary {
        digest: digest.to_owned(),
        tags,
        blobs,
    })
}

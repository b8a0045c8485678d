//! The persisted registry document and the templates that populate it

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::oci::{ConfigBlob, ImageFormat, StoredManifest};

/// A username and password accepted by the Basic auth gate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credential {
    /// Username
    pub username: String,
    /// Password, compared verbatim
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// A repository entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Repository {
    /// Repository name
    pub name: String,
}

/// A tag pointing at a manifest digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagRef {
    /// Tag name
    pub tag: String,
    /// Manifest digest
    pub digest: String,
}

/// The whole registry: credentials, names, tags, manifests and config blobs.
///
/// This is both the in-memory state of the server and the document it
/// persists. Maps are ordered so the persisted form is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Database {
    /// Accepted credentials; empty disables authentication
    pub auth: Vec<Credential>,
    /// Known repositories
    pub repositories: Vec<Repository>,
    /// Tags per repository name
    pub tags: BTreeMap<String, Vec<TagRef>>,
    /// Manifests by digest
    pub manifests: BTreeMap<String, StoredManifest>,
    /// Config blobs by digest
    pub blobs: BTreeMap<String, ConfigBlob>,
}

impl Database {
    /// Parse a persisted document.
    pub fn from_document(document: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(document)
    }

    /// Render the persisted document.
    pub fn to_document(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Whether a repository with this name exists.
    pub fn has_repository(&self, name: &str) -> bool {
        self.repositories.iter().any(|r| r.name == name)
    }

    /// Repository names, sorted.
    pub fn repository_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repositories.iter().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    /// Tag names of a repository, sorted. `None` when the repository is unknown.
    pub fn tag_names(&self, repository: &str) -> Option<Vec<String>> {
        if !self.has_repository(repository) {
            return None;
        }

        let mut tags: Vec<String> = self
            .tags
            .get(repository)
            .map(|tags| tags.iter().map(|t| t.tag.clone()).collect())
            .unwrap_or_default();
        tags.sort();
        tags.dedup();
        Some(tags)
    }

    /// Resolve a tag in a repository to its digest.
    pub fn resolve_tag(&self, repository: &str, tag: &str) -> Option<&str> {
        self.tags
            .get(repository)?
            .iter()
            .find(|t| t.tag == tag)
            .map(|t| t.digest.as_str())
    }

    /// Add a repository if it is not already present.
    pub fn ensure_repository(&mut self, name: &str) {
        if !self.has_repository(name) {
            self.repositories.push(Repository {
                name: name.to_owned(),
            });
        }
    }

    /// Point a tag at a digest, moving it if it already exists.
    pub fn set_tag(&mut self, repository: &str, tag: &str, digest: String) {
        let tags = self.tags.entry(repository.to_owned()).or_default();
        match tags.iter_mut().find(|t| t.tag == tag) {
            Some(existing) => existing.digest = digest,
            None => tags.push(TagRef {
                tag: tag.to_owned(),
                digest,
            }),
        }
    }

    /// Add a credential unless an identical one is present.
    pub fn ensure_credential(&mut self, credential: &Credential) {
        if !self.auth.contains(credential) {
            self.auth.push(credential.clone());
        }
    }
}

fn default_architectures() -> Vec<String> {
    vec!["amd64".into(), "arm64".into()]
}

fn default_os() -> String {
    "linux".into()
}

/// One repository to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTemplate {
    /// Repository name
    pub name: String,
    /// Tags to create, each pointing at freshly generated content
    #[serde(default)]
    pub tags: Vec<String>,
    /// Media type family
    #[serde(default)]
    pub format: ImageFormat,
    /// Generate an index over all architectures instead of a single manifest
    #[serde(default)]
    pub multiarch: bool,
    /// Architectures; only the first is used unless `multiarch`
    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,
    /// Operating system of every generated platform
    #[serde(default = "default_os")]
    pub os: String,
}

impl RepositoryTemplate {
    /// A single-arch OCI template with the given tags.
    pub fn new<S: Into<String>>(name: S, tags: &[&str]) -> Self {
        Self {
            name: name.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            format: ImageFormat::default(),
            multiarch: false,
            architectures: default_architectures(),
            os: default_os(),
        }
    }

    /// Architectures this template generates platforms for.
    pub fn platforms(&self) -> &[String] {
        if self.multiarch {
            &self.architectures
        } else {
            &self.architectures[..self.architectures.len().min(1)]
        }
    }
}

/// Desired registry contents, consumed by the generator and by push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Credentials to install
    #[serde(default)]
    pub auth: Vec<Credential>,
    /// Repositories to generate
    #[serde(default)]
    pub repositories: Vec<RepositoryTemplate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_defaults() {
        let template: Template =
            serde_json::from_str(r#"{"repositories":[{"name":"alpine","tags":["latest"]}]}"#)
                .unwrap();
        let repo = &template.repositories[0];
        assert_eq!(repo.format, ImageFormat::Oci);
        assert!(!repo.multiarch);
        assert_eq!(repo.architectures, vec!["amd64", "arm64"]);
        assert_eq!(repo.os, "linux");
        assert_eq!(repo.platforms(), &["amd64".to_string()]);
        assert!(template.auth.is_empty());
    }

    #[test]
    fn multiarch_uses_every_architecture() {
        let mut repo = RepositoryTemplate::new("busybox", &["1"]);
        repo.multiarch = true;
        assert_eq!(repo.platforms().len(), 2);
    }

    #[test]
    fn set_tag_moves_existing() {
        let mut db = Database::default();
        db.ensure_repository("alpine");
        db.ensure_repository("alpine");
        db.set_tag("alpine", "latest", "sha256:a".into());
        db.set_tag("alpine", "latest", "sha256:b".into());
        assert_eq!(db.repositories.len(), 1);
        assert_eq!(db.tags["alpine"].len(), 1);
        assert_eq!(db.resolve_tag("alpine", "latest"), Some("sha256:b"));
    }

    #[test]
    fn tag_names_sorted_and_unknown_repo() {
        let mut db = Database::default();
        db.ensure_repository("alpine");
        for tag in ["b", "a", "c"] {
            db.set_tag("alpine", tag, "sha256:x".into());
        }
        assert_eq!(db.tag_names("alpine").unwrap(), vec!["a", "b", "c"]);
        assert!(db.tag_names("missing").is_none());
    }

    #[test]
    fn document_requires_every_section() {
        let empty = Database::default().to_document().unwrap();
        assert_eq!(Database::from_document(&empty).unwrap(), Database::default());

        assert!(Database::from_document(b"{}").is_err());
        assert!(Database::from_document(br#"{"repos": []}"#).is_err());
    }

    #[test]
    fn credential_debug_hides_password() {
        let cred = Credential {
            username: "admin".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{cred:?}").contains("hunter2"));
    }
}

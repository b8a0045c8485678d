//! Structural and referential checks over a [`Database`]
//!
//! Every check here is a pure function that collects violations instead of
//! stopping at the first one. The server runs [`validate`] before it starts
//! serving and on every mutated copy before publishing it; the generator runs
//! it on everything it produces.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::database::Database;
use crate::digest::{self, is_well_formed};
use crate::oci::StoredManifest;

static REPOSITORY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("repository name pattern compiles")
});

static TAG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("tag pattern compiles")
});

/// Whether a repository name is lowercase alphanumeric segments joined by `.`, `_` or `-`.
pub fn is_repository_name(name: &str) -> bool {
    REPOSITORY_NAME.is_match(name)
}

/// Whether a tag matches the distribution tag grammar.
pub fn is_tag_name(tag: &str) -> bool {
    TAG_NAME.is_match(tag)
}

/// A database that failed validation, with every violation found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    violations: Vec<String>,
}

impl ValidationError {
    /// Wrap a non-empty list of violations.
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }

    /// The human-readable violations.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "database failed validation with {} violation(s):",
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Run structural and referential validation.
pub fn validate(db: &Database) -> Result<(), ValidationError> {
    let mut violations = structural(db);
    violations.extend(referential(db));

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(violations))
    }
}

/// Top-level keys every persisted document must carry.
const DOCUMENT_KEYS: [&str; 5] = ["auth", "repositories", "tags", "manifests", "blobs"];

fn shape_error(err: serde_json::Error) -> ValidationError {
    ValidationError::new(vec![format!("document shape: {err}")])
}

/// Parse a persisted document and validate it.
///
/// Every missing top-level key is reported. Other shape errors from parsing
/// are reported as a single violation.
pub fn validate_document(document: &[u8]) -> Result<Database, ValidationError> {
    let value: serde_json::Value = serde_json::from_slice(document).map_err(shape_error)?;
    let Some(object) = value.as_object() else {
        return Err(ValidationError::new(vec![
            "document shape: expected a JSON object".to_owned(),
        ]));
    };

    let missing: Vec<String> = DOCUMENT_KEYS
        .iter()
        .filter(|key| !object.contains_key(**key))
        .map(|key| format!("document: missing field '{key}'"))
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::new(missing));
    }

    let db: Database = serde_json::from_value(value).map_err(shape_error)?;
    validate(&db)?;
    Ok(db)
}

/// Validate a document the server is about to serve.
///
/// On top of [`validate_document`], every manifest and blob must re-serialize
/// to the bytes its key addresses, since those are the bytes that get served.
pub fn load_document(document: &[u8]) -> Result<Database, ValidationError> {
    let db = validate_document(document)?;
    let mismatches = verify_digests(&db);
    if mismatches.is_empty() {
        Ok(db)
    } else {
        Err(ValidationError::new(mismatches))
    }
}

/// Field-level checks: digests, names, tags and manifest headers.
pub fn structural(db: &Database) -> Vec<String> {
    let mut violations = Vec::new();

    for (i, credential) in db.auth.iter().enumerate() {
        if credential.username.is_empty() {
            violations.push(format!("auth[{i}]: username is empty"));
        }
        if credential.username.contains(':') {
            violations.push(format!("auth[{i}]: username contains ':'"));
        }
    }

    let mut seen = HashSet::new();
    for repository in &db.repositories {
        if !is_repository_name(&repository.name) {
            violations.push(format!(
                "repository '{}': name does not match the naming pattern",
                repository.name
            ));
        }
        if !seen.insert(repository.name.as_str()) {
            violations.push(format!("repository '{}': listed more than once", repository.name));
        }
    }

    for (name, tags) in &db.tags {
        let mut seen = HashSet::new();
        for entry in tags {
            if !is_tag_name(&entry.tag) {
                violations.push(format!("tag '{name}:{}': invalid tag name", entry.tag));
            }
            if !seen.insert(entry.tag.as_str()) {
                violations.push(format!("tag '{name}:{}': listed more than once", entry.tag));
            }
            if !is_well_formed(&entry.digest) {
                violations.push(format!(
                    "tag '{name}:{}': malformed digest '{}'",
                    entry.tag, entry.digest
                ));
            }
        }
    }

    for (key, manifest) in &db.manifests {
        if !is_well_formed(key) {
            violations.push(format!("manifest '{key}': malformed digest key"));
        }
        structural_manifest(key, manifest, &mut violations);
    }

    for (key, blob) in &db.blobs {
        if !is_well_formed(key) {
            violations.push(format!("blob '{key}': malformed digest key"));
        }
        if blob.architecture.is_empty() || blob.os.is_empty() {
            violations.push(format!("blob '{key}': missing architecture or os"));
        }
        for diff_id in &blob.rootfs.diff_ids {
            if !is_well_formed(diff_id) {
                violations.push(format!("blob '{key}': malformed diff id '{diff_id}'"));
            }
        }
    }

    violations
}

fn structural_manifest(key: &str, manifest: &StoredManifest, violations: &mut Vec<String>) {
    let kind = manifest.kind();
    if manifest.body_media_type() != kind.media_type() {
        violations.push(format!(
            "manifest '{key}': mediaType '{}' does not match type {kind:?}",
            manifest.body_media_type()
        ));
    }

    match manifest {
        StoredManifest::Oci(m) | StoredManifest::Docker(m) => {
            if m.schema_version != 2 {
                violations.push(format!("manifest '{key}': schemaVersion must be 2"));
            }
            if !is_well_formed(&m.config.digest) {
                violations.push(format!(
                    "manifest '{key}': malformed config digest '{}'",
                    m.config.digest
                ));
            }
            if m.layers.is_empty() {
                violations.push(format!("manifest '{key}': no layers"));
            }
            for layer in &m.layers {
                if !is_well_formed(&layer.digest) {
                    violations.push(format!(
                        "manifest '{key}': malformed layer digest '{}'",
                        layer.digest
                    ));
                }
            }
        }
        StoredManifest::OciIndex(i) | StoredManifest::DockerList(i) => {
            if i.schema_version != 2 {
                violations.push(format!("manifest '{key}': schemaVersion must be 2"));
            }
            if i.manifests.is_empty() {
                violations.push(format!("manifest '{key}': index has no manifests"));
            }
            for child in &i.manifests {
                if !is_well_formed(&child.digest) {
                    violations.push(format!(
                        "manifest '{key}': malformed platform manifest digest '{}'",
                        child.digest
                    ));
                }
            }
        }
    }
}

/// Cross-reference checks: tags, manifests, indexes and config blobs all resolve.
pub fn referential(db: &Database) -> Vec<String> {
    let mut violations = Vec::new();

    for (name, tags) in &db.tags {
        if !db.has_repository(name) {
            violations.push(format!("tags: repository '{name}' is not in repositories"));
        }
        for entry in tags {
            if !db.manifests.contains_key(&entry.digest) {
                violations.push(format!(
                    "tag '{name}:{}': manifest {} does not exist",
                    entry.tag, entry.digest
                ));
            }
        }
    }

    for (key, manifest) in &db.manifests {
        if let Some(config) = manifest.config_digest() {
            if !db.blobs.contains_key(config) {
                violations.push(format!("manifest '{key}': config blob {config} does not exist"));
            }
        }

        for child in manifest.children() {
            match db.manifests.get(&child.digest) {
                None => violations.push(format!(
                    "manifest '{key}': platform manifest {} does not exist",
                    child.digest
                )),
                Some(target) if !target.kind().is_single_arch() => violations.push(format!(
                    "manifest '{key}': platform manifest {} is not a single-arch manifest",
                    child.digest
                )),
                Some(target) => {
                    let architecture = target
                        .config_digest()
                        .and_then(|config| db.blobs.get(config))
                        .map(|blob| blob.architecture.as_str());
                    if architecture.is_some_and(|a| a != child.platform.architecture) {
                        violations.push(format!(
                            "manifest '{key}': platform {} points at another architecture",
                            child.platform.architecture
                        ));
                    }
                }
            }
        }
    }

    violations
}

/// Recompute every manifest and blob digest and compare it to its key.
pub fn verify_digests(db: &Database) -> Vec<String> {
    let mut violations = Vec::new();

    for (key, manifest) in &db.manifests {
        match manifest.to_body(None) {
            Ok(body) if digest::digest(&body) == *key => {}
            Ok(body) => violations.push(format!(
                "manifest '{key}': content digest is {}",
                digest::digest(&body)
            )),
            Err(err) => violations.push(format!("manifest '{key}': {err}")),
        }
    }

    for (key, blob) in &db.blobs {
        match digest::digest_json(blob) {
            Ok((actual, _)) if actual == *key => {}
            Ok((actual, _)) => {
                violations.push(format!("blob '{key}': content digest is {actual}"))
            }
            Err(err) => violations.push(format!("blob '{key}': {err}")),
        }
    }

    violations
}

/// Blob digests referenced by any manifest's config.
pub fn referenced_blobs(db: &Database) -> HashSet<&str> {
    db.manifests
        .values()
        .filter_map(StoredManifest::config_digest)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Repository, TagRef};
    use crate::oci::{Descriptor, ImageIndex, Platform, PlatformDescriptor, media_type};

    fn digest_of(s: &str) -> String {
        digest::digest(s.as_bytes())
    }

    #[test]
    fn names() {
        for ok in ["alpine", "my-app", "a.b_c-d", "x1"] {
            assert!(is_repository_name(ok), "{ok}");
        }
        for bad in ["Alpine", "-app", "app-", "a..b", "", "a/b"] {
            assert!(!is_repository_name(bad), "{bad}");
        }
        assert!(is_tag_name("v1.2.3-rc_1"));
        assert!(!is_tag_name(".hidden"));
        assert!(!is_tag_name(&"a".repeat(129)));
    }

    #[test]
    fn empty_database_is_valid() {
        assert!(validate(&Database::default()).is_ok());
    }

    #[test]
    fn referential_collects_every_violation() {
        let mut db = Database::default();
        db.tags.insert(
            "ghost".into(),
            vec![TagRef {
                tag: "latest".into(),
                digest: digest_of("missing"),
            }],
        );
        db.manifests.insert(
            digest_of("index"),
            StoredManifest::OciIndex(ImageIndex {
                schema_version: 2,
                media_type: media_type::OCI_INDEX.into(),
                manifests: vec![PlatformDescriptor {
                    media_type: media_type::OCI_MANIFEST.into(),
                    digest: digest_of("child"),
                    size: 1,
                    platform: Platform {
                        architecture: "amd64".into(),
                        os: "linux".into(),
                    },
                }],
            }),
        );

        let violations = referential(&db);
        assert_eq!(violations.len(), 3, "{violations:#?}");

        let err = validate(&db).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn structural_flags_bad_fields() {
        let mut db = Database::default();
        db.repositories.push(Repository {
            name: "Bad Name".into(),
        });
        db.repositories.push(Repository {
            name: "Bad Name".into(),
        });
        db.manifests.insert(
            "sha256:short".into(),
            StoredManifest::Docker(crate::oci::ImageManifest {
                schema_version: 2,
                media_type: media_type::OCI_MANIFEST.into(),
                config: Descriptor {
                    media_type: media_type::DOCKER_CONFIG.into(),
                    digest: "nope".into(),
                    size: 0,
                },
                layers: vec![],
            }),
        );

        let violations = structural(&db);
        // two bad names, duplicate, key, media type, config digest, no layers
        assert_eq!(violations.len(), 7, "{violations:#?}");
    }

    #[test]
    fn validation_is_idempotent() {
        let mut db = Database::default();
        db.tags.insert("ghost".into(), vec![]);
        let first = validate(&db).unwrap_err();
        let second = validate(&db).unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn document_shape_errors() {
        let err = validate_document(br#"{"repositories": 3}"#).unwrap_err();
        assert_eq!(err.violations().len(), 1);
        assert!(err.violations()[0].starts_with("document shape"));

        let err = validate_document(b"[]").unwrap_err();
        assert_eq!(err.violations(), ["document shape: expected a JSON object"]);
    }

    #[test]
    fn missing_document_keys_are_all_reported() {
        let err = validate_document(b"{}").unwrap_err();
        assert_eq!(err.violations().len(), 5, "{err}");

        let err = validate_document(br#"{"auth": [], "repositories": []}"#).unwrap_err();
        assert_eq!(
            err.violations(),
            [
                "document: missing field 'tags'",
                "document: missing field 'manifests'",
                "document: missing field 'blobs'",
            ]
        );

        let complete = Database::default().to_document().unwrap();
        assert_eq!(validate_document(&complete).unwrap(), Database::default());
    }

    #[test]
    fn unknown_nested_fields_are_rejected() {
        let document = serde_json::json!({
            "auth": [],
            "repositories": [{"name": "alpine", "description": "extra"}],
            "tags": {},
            "manifests": {},
            "blobs": {},
        });
        let err = validate_document(&serde_json::to_vec(&document).unwrap()).unwrap_err();
        assert!(err.violations()[0].contains("unknown field `description`"), "{err}");
    }
}

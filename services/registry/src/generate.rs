//! Synthetic image generation
//!
//! The generator turns a [`Template`] into repositories, tags, manifests and
//! config blobs. Layers are never materialized: each one is a random token
//! whose digest stands in for the layer's content address, recorded with a
//! random size. Everything else (config blobs, manifests, indexes) is real
//! JSON addressed by the digest of its compact serialization.
//!
//! Randomness and the clock are injected so that tests can pin both. Two runs
//! with different random sources produce different digests; every run is
//! internally consistent.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::Rng;

use crate::database::{Database, RepositoryTemplate, Template};
use crate::digest::{digest, digest_json};
use crate::oci::{
    ConfigBlob, Descriptor, Empty, History, ImageFormat, ImageIndex, ImageManifest, Platform,
    PlatformDescriptor, RootFs, RuntimeConfig, StoredManifest,
};
use crate::presets;
use crate::validate::{self, ValidationError, is_repository_name, is_tag_name};

const MIN_LAYERS: usize = 1;
const MAX_LAYERS: usize = 5;
const MIN_LAYER_SIZE: u64 = 1_000_000;
const MAX_LAYER_SIZE: u64 = 100_000_000;
const MAX_AGE_SECONDS: i64 = 365 * 24 * 60 * 60;

const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

const BUILD_STEPS: &[&str] = &[
    "/bin/sh -c apk add --no-cache ca-certificates tzdata",
    "/bin/sh -c #(nop) WORKDIR /app",
    "/bin/sh -c #(nop) COPY dir:3f1c9e0a in /app",
    "/bin/sh -c #(nop) ENV LANG=C.UTF-8",
    "/bin/sh -c addgroup -S app && adduser -S app -G app",
];

const LICENSES: &[&str] = &["MIT", "Apache-2.0", "BSD-3-Clause", "GPL-3.0-only", "MPL-2.0"];

const ADJECTIVES: &[&str] = &["Lightweight", "Minimal", "Hardened", "Production-ready", "Slim"];

const PURPOSES: &[&str] = &[
    "local development",
    "continuous integration",
    "edge deployments",
    "integration testing",
    "batch workloads",
];

/// Errors raised while generating registry content.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The template asks for something that cannot be generated
    #[error("invalid template: {0}")]
    Template(String),

    /// A generated document could not be serialized
    #[error("serializing generated content: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The generated database broke an invariant
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Generate a fresh database from a template using thread-local randomness.
pub fn generate(template: &Template) -> Result<Database, GenerateError> {
    Generator::new(rand::rng()).generate(template)
}

/// Builds registry content from templates.
#[derive(Debug)]
pub struct Generator<R> {
    rng: R,
    now: DateTime<Utc>,
}

impl<R: Rng> Generator<R> {
    /// Create a generator drawing from `rng`, with the clock at the current time.
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            now: Utc::now(),
        }
    }

    /// Pin the clock that creation timestamps are drawn back from.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Generate a new database and check it before handing it back.
    pub fn generate(&mut self, template: &Template) -> Result<Database, GenerateError> {
        let mut db = Database::default();
        self.apply(&mut db, template)?;
        validate::validate(&db)?;
        Ok(db)
    }

    /// Add everything a template describes to an existing database.
    ///
    /// Existing entries are kept. A tag that already exists is moved to the
    /// newly generated content.
    pub fn apply(&mut self, db: &mut Database, template: &Template) -> Result<(), GenerateError> {
        check_template(template)?;

        for credential in &template.auth {
            db.ensure_credential(credential);
        }

        for repository in &template.repositories {
            db.ensure_repository(&repository.name);

            let mut seen = HashSet::new();
            for tag in &repository.tags {
                if !seen.insert(tag.as_str()) {
                    continue;
                }
                let digest = self.image(db, repository)?;
                tracing::debug!(repository = %repository.name, %tag, %digest, "generated image");
                db.set_tag(&repository.name, tag, digest);
            }
        }

        Ok(())
    }

    /// Generate one tag's worth of content and return the digest the tag should point at.
    fn image(
        &mut self,
        db: &mut Database,
        repository: &RepositoryTemplate,
    ) -> Result<String, GenerateError> {
        let mut platforms = Vec::new();
        for architecture in repository.platforms() {
            platforms.push(self.platform_manifest(db, repository, architecture)?);
        }

        if !repository.multiarch {
            return platforms
                .pop()
                .map(|descriptor| descriptor.digest)
                .ok_or_else(|| {
                    GenerateError::Template(format!("{}: no architecture", repository.name))
                });
        }

        let index = ImageIndex {
            schema_version: 2,
            media_type: repository.format.index_media_type().to_owned(),
            manifests: platforms,
        };
        let (digest, _) = digest_json(&index)?;
        db.manifests
            .insert(digest.clone(), StoredManifest::index(repository.format, index));
        Ok(digest)
    }

    fn platform_manifest(
        &mut self,
        db: &mut Database,
        repository: &RepositoryTemplate,
        architecture: &str,
    ) -> Result<PlatformDescriptor, GenerateError> {
        let format = repository.format;
        let layers = self.layers(format);

        let config = self.config(repository, architecture, &layers);
        let (config_digest, config_bytes) = digest_json(&config)?;
        db.blobs.insert(config_digest.clone(), config);

        let manifest = ImageManifest {
            schema_version: 2,
            media_type: format.manifest_media_type().to_owned(),
            config: Descriptor {
                media_type: format.config_media_type().to_owned(),
                digest: config_digest,
                size: config_bytes.len() as u64,
            },
            layers,
        };
        let (digest, bytes) = digest_json(&manifest)?;
        db.manifests
            .insert(digest.clone(), StoredManifest::image(format, manifest));

        Ok(PlatformDescriptor {
            media_type: format.manifest_media_type().to_owned(),
            digest,
            size: bytes.len() as u64,
            platform: Platform {
                architecture: architecture.to_owned(),
                os: repository.os.clone(),
            },
        })
    }

    fn layers(&mut self, format: ImageFormat) -> Vec<Descriptor> {
        let count = self.rng.random_range(MIN_LAYERS..=MAX_LAYERS);
        (0..count)
            .map(|_| {
                let size = self.rng.random_range(MIN_LAYER_SIZE..=MAX_LAYER_SIZE);
                let id = uuid::Builder::from_random_bytes(self.rng.random()).into_uuid();
                Descriptor {
                    media_type: format.layer_media_type().to_owned(),
                    digest: digest(format!("{size}:{id}").as_bytes()),
                    size,
                }
            })
            .collect()
    }

    fn config(
        &mut self,
        repository: &RepositoryTemplate,
        architecture: &str,
        layers: &[Descriptor],
    ) -> ConfigBlob {
        let created = self.now - Duration::seconds(self.rng.random_range(0..MAX_AGE_SECONDS));
        let version = format!(
            "{}.{}.{}",
            self.rng.random_range(0..=4),
            self.rng.random_range(0..=20),
            self.rng.random_range(0..=30)
        );
        let description = format!(
            "{} {} image for {}",
            self.pick(ADJECTIVES),
            repository.name,
            self.pick(PURPOSES)
        );

        let history = layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let at = created + Duration::minutes(i as i64);
                if i == 0 {
                    History {
                        created: timestamp(at),
                        created_by: format!(
                            "/bin/sh -c #(nop) ADD file:{} in / ",
                            &layer.digest["sha256:".len()..]
                        ),
                        comment: Some("base layer".to_owned()),
                        empty_layer: false,
                    }
                } else {
                    History {
                        created: timestamp(at),
                        created_by: BUILD_STEPS[(i - 1) % BUILD_STEPS.len()].to_owned(),
                        comment: None,
                        empty_layer: self.rng.random_bool(0.5),
                    }
                }
            })
            .collect();

        let mut labels = BTreeMap::new();
        labels.insert("org.opencontainers.image.title".to_owned(), repository.name.clone());
        labels.insert("org.opencontainers.image.description".to_owned(), description);
        labels.insert(
            "org.opencontainers.image.source".to_owned(),
            format!("https://github.com/example/{}", repository.name),
        );
        labels.insert("org.opencontainers.image.version".to_owned(), version);
        labels.insert(
            "org.opencontainers.image.licenses".to_owned(),
            self.pick(LICENSES).to_owned(),
        );

        let mut runtime = RuntimeConfig {
            env: vec![DEFAULT_PATH.to_owned()],
            cmd: vec!["/bin/sh".to_owned()],
            labels,
            ..Default::default()
        };

        if let Some(preset) = presets::lookup(&repository.name) {
            runtime.user = Some(preset.user.to_owned());
            runtime.exposed_ports.insert(preset.port.to_owned(), Empty {});
            runtime.volumes.insert(preset.volume.to_owned(), Empty {});
            runtime.env.extend(preset.env.iter().map(|e| e.to_string()));
            runtime.entrypoint = Some(preset.entrypoint.iter().map(|e| e.to_string()).collect());
            runtime.cmd = preset.cmd.iter().map(|c| c.to_string()).collect();
        }

        ConfigBlob {
            architecture: architecture.to_owned(),
            os: repository.os.clone(),
            created: timestamp(created),
            config: runtime,
            rootfs: RootFs {
                kind: "layers".to_owned(),
                diff_ids: layers.iter().map(|l| l.digest.clone()).collect(),
            },
            history,
        }
    }

    fn pick(&mut self, choices: &[&'static str]) -> &'static str {
        choices[self.rng.random_range(0..choices.len())]
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn check_template(template: &Template) -> Result<(), GenerateError> {
    for credential in &template.auth {
        if credential.username.is_empty() || credential.username.contains(':') {
            return Err(GenerateError::Template(format!(
                "invalid username '{}'",
                credential.username
            )));
        }
    }

    for repository in &template.repositories {
        if !is_repository_name(&repository.name) {
            return Err(GenerateError::Template(format!(
                "invalid repository name '{}'",
                repository.name
            )));
        }
        if let Some(tag) = repository.tags.iter().find(|t| !is_tag_name(t)) {
            return Err(GenerateError::Template(format!(
                "{}: invalid tag '{tag}'",
                repository.name
            )));
        }
        if repository.architectures.is_empty()
            || repository.architectures.iter().any(String::is_empty)
        {
            return Err(GenerateError::Template(format!(
                "{}: architectures must be non-empty",
                repository.name
            )));
        }
        if repository.os.is_empty() {
            return Err(GenerateError::Template(format!(
                "{}: os must be non-empty",
                repository.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::oci::{ManifestKind, media_type};

    fn fixed_clock() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn generator(seed: u64) -> Generator<StdRng> {
        Generator::new(StdRng::seed_from_u64(seed)).at(fixed_clock())
    }

    fn template(repositories: Vec<RepositoryTemplate>) -> Template {
        Template {
            auth: vec![],
            repositories,
        }
    }

    #[test]
    fn single_arch_oci() {
        let db = generator(1)
            .generate(&template(vec![RepositoryTemplate::new("alpine", &["latest"])]))
            .unwrap();

        let digest = db.resolve_tag("alpine", "latest").unwrap();
        let manifest = &db.manifests[digest];
        assert_eq!(manifest.kind(), ManifestKind::Oci);
        assert_eq!(db.blobs.len(), 1);

        let StoredManifest::Oci(image) = manifest else {
            panic!("expected an OCI manifest");
        };
        assert!((MIN_LAYERS..=MAX_LAYERS).contains(&image.layers.len()));
        for layer in &image.layers {
            assert!((MIN_LAYER_SIZE..=MAX_LAYER_SIZE).contains(&layer.size));
            assert_eq!(layer.media_type, media_type::OCI_LAYER);
        }

        let blob = &db.blobs[&image.config.digest];
        assert_eq!(blob.architecture, "amd64");
        assert_eq!(blob.history.len(), image.layers.len());
        assert_eq!(blob.history[0].comment.as_deref(), Some("base layer"));
        assert_eq!(blob.rootfs.diff_ids.len(), image.layers.len());
        assert_eq!(
            blob.config.labels["org.opencontainers.image.title"],
            "alpine"
        );
        let license = &blob.config.labels["org.opencontainers.image.licenses"];
        assert!(LICENSES.contains(&license.as_str()));
    }

    #[test]
    fn multiarch_docker_list() {
        let mut repo = RepositoryTemplate::new("busybox", &["1.36"]);
        repo.multiarch = true;
        repo.format = ImageFormat::Docker;
        repo.architectures = vec!["amd64".into(), "arm64".into(), "riscv64".into()];

        let db = generator(2).generate(&template(vec![repo])).unwrap();

        let digest = db.resolve_tag("busybox", "1.36").unwrap();
        let StoredManifest::DockerList(list) = &db.manifests[digest] else {
            panic!("expected a docker manifest list");
        };
        assert_eq!(list.media_type, media_type::DOCKER_LIST);
        assert_eq!(list.manifests.len(), 3);
        for child in &list.manifests {
            let target = &db.manifests[&child.digest];
            assert_eq!(target.kind(), ManifestKind::Docker);
            let blob = &db.blobs[target.config_digest().unwrap()];
            assert_eq!(blob.architecture, child.platform.architecture);
            assert_eq!(child.platform.os, "linux");
        }
        assert_eq!(db.manifests.len(), 4);
        assert_eq!(db.blobs.len(), 3);
    }

    #[test]
    fn content_addresses_match() {
        let mut repo = RepositoryTemplate::new("nginx", &["1", "2"]);
        repo.multiarch = true;
        let db = generator(3).generate(&template(vec![repo])).unwrap();
        assert!(validate::verify_digests(&db).is_empty());

        for child in db.manifests.values().flat_map(|m| m.children()) {
            let body = db.manifests[&child.digest].to_body(None).unwrap();
            assert_eq!(child.size, body.len() as u64);
        }
    }

    #[test]
    fn presets_enrich_known_repositories() {
        let db = generator(4)
            .generate(&template(vec![
                RepositoryTemplate::new("postgres", &["16"]),
                RepositoryTemplate::new("custom", &["1"]),
            ]))
            .unwrap();

        let config_of = |repo: &str, tag: &str| {
            let digest = db.resolve_tag(repo, tag).unwrap();
            let blob = db.manifests[digest].config_digest().unwrap();
            db.blobs[blob].config.clone()
        };

        let postgres = config_of("postgres", "16");
        assert_eq!(postgres.user.as_deref(), Some("postgres"));
        assert!(postgres.exposed_ports.contains_key("5432/tcp"));
        assert!(postgres.volumes.contains_key("/var/lib/postgresql/data"));
        assert_eq!(postgres.cmd, vec!["postgres"]);

        let custom = config_of("custom", "1");
        assert!(custom.user.is_none());
        assert!(custom.exposed_ports.is_empty());
        assert_eq!(custom.cmd, vec!["/bin/sh"]);
    }

    #[test]
    fn timestamps_within_last_year() {
        let db = generator(5)
            .generate(&template(vec![RepositoryTemplate::new("a", &["1", "2", "3"])]))
            .unwrap();
        for blob in db.blobs.values() {
            let created = DateTime::parse_from_rfc3339(&blob.created)
                .unwrap()
                .with_timezone(&Utc);
            assert!(created <= fixed_clock());
            assert!(created > fixed_clock() - Duration::days(366));
        }
    }

    #[test]
    fn same_seed_same_digests() {
        let t = template(vec![RepositoryTemplate::new("alpine", &["latest"])]);
        let a = generator(42).generate(&t).unwrap();
        let b = generator(42).generate(&t).unwrap();
        let c = generator(43).generate(&t).unwrap();
        assert_eq!(a, b);
        assert_ne!(
            a.resolve_tag("alpine", "latest"),
            c.resolve_tag("alpine", "latest")
        );
    }

    #[test]
    fn apply_is_additive_and_moves_tags() {
        let mut generator = generator(6);
        let mut db = generator
            .generate(&template(vec![RepositoryTemplate::new("alpine", &["latest", "3"])]))
            .unwrap();
        let before = db.resolve_tag("alpine", "latest").unwrap().to_owned();
        let pinned = db.resolve_tag("alpine", "3").unwrap().to_owned();

        generator
            .apply(
                &mut db,
                &template(vec![
                    RepositoryTemplate::new("alpine", &["latest"]),
                    RepositoryTemplate::new("redis", &["7"]),
                ]),
            )
            .unwrap();

        assert_eq!(db.repository_names(), vec!["alpine", "redis"]);
        assert_eq!(db.tags["alpine"].len(), 2);
        assert_ne!(db.resolve_tag("alpine", "latest").unwrap(), before);
        assert_eq!(db.resolve_tag("alpine", "3").unwrap(), pinned);
        assert!(db.manifests.contains_key(&before));
        assert!(validate::validate(&db).is_ok());
    }

    #[test]
    fn duplicate_template_tags_collapse() {
        let db = generator(7)
            .generate(&template(vec![RepositoryTemplate::new("alpine", &["x", "x"])]))
            .unwrap();
        assert_eq!(db.tags["alpine"].len(), 1);
        assert_eq!(db.manifests.len(), 1);
    }

    #[test]
    fn rejects_bad_templates() {
        let mut no_arch = RepositoryTemplate::new("alpine", &["latest"]);
        no_arch.architectures.clear();

        for repo in [
            RepositoryTemplate::new("Alpine", &["latest"]),
            RepositoryTemplate::new("alpine", &[".bad"]),
            no_arch,
        ] {
            let err = generator(8).generate(&template(vec![repo])).unwrap_err();
            assert!(matches!(err, GenerateError::Template(_)), "{err}");
        }
    }

    #[test]
    fn random_templates_hold_invariants() {
        let mut shape = StdRng::seed_from_u64(99);
        for seed in 0..25 {
            let repositories = (0..shape.random_range(1..=4))
                .map(|r| {
                    let tags: Vec<String> = (0..shape.random_range(0..=3))
                        .map(|t| format!("v{t}"))
                        .collect();
                    RepositoryTemplate {
                        name: format!("repo-{r}"),
                        tags,
                        format: if shape.random_bool(0.5) {
                            ImageFormat::Oci
                        } else {
                            ImageFormat::Docker
                        },
                        multiarch: shape.random_bool(0.5),
                        architectures: vec!["amd64".into(), "arm64".into(), "s390x".into()]
                            [..shape.random_range(1..=3)]
                            .to_vec(),
                        os: "linux".into(),
                    }
                })
                .collect();

            let db = generator(seed).generate(&template(repositories)).unwrap();
            assert!(validate::referential(&db).is_empty());
            assert!(validate::structural(&db).is_empty());
            assert!(validate::verify_digests(&db).is_empty());
        }
    }
}

//! OCI and Docker image documents
//!
//! Manifests are stored as a tagged union over the four kinds the registry
//! serves. Field order on every struct here is part of the content address:
//! the generator hashes the compact JSON produced from these types, and the
//! server replays the same serialization when it serves them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Media types used in manifests and their descriptors.
pub mod media_type {
    /// OCI image manifest
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    /// OCI image index
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    /// OCI image config
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    /// OCI gzip layer
    pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

    /// Docker image manifest, schema 2
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    /// Docker manifest list
    pub const DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    /// Docker container config
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    /// Docker gzip layer
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
}

/// Image format requested by a template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// OCI image spec media types
    #[default]
    Oci,
    /// Docker distribution media types
    Docker,
}

impl ImageFormat {
    /// Media type of a single-platform manifest in this format.
    pub fn manifest_media_type(self) -> &'static str {
        match self {
            ImageFormat::Oci => media_type::OCI_MANIFEST,
            ImageFormat::Docker => media_type::DOCKER_MANIFEST,
        }
    }

    /// Media type of a multi-platform index in this format.
    pub fn index_media_type(self) -> &'static str {
        match self {
            ImageFormat::Oci => media_type::OCI_INDEX,
            ImageFormat::Docker => media_type::DOCKER_LIST,
        }
    }

    /// Media type of the config blob descriptor.
    pub fn config_media_type(self) -> &'static str {
        match self {
            ImageFormat::Oci => media_type::OCI_CONFIG,
            ImageFormat::Docker => media_type::DOCKER_CONFIG,
        }
    }

    /// Media type of a layer descriptor.
    pub fn layer_media_type(self) -> &'static str {
        match self {
            ImageFormat::Oci => media_type::OCI_LAYER,
            ImageFormat::Docker => media_type::DOCKER_LAYER,
        }
    }
}

/// The `type` tag of a stored manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// OCI single-platform manifest
    Oci,
    /// Docker single-platform manifest
    Docker,
    /// OCI multi-platform index
    OciIndex,
    /// Docker multi-platform manifest list
    DockerList,
}

impl ManifestKind {
    /// Canonical media type served for this kind.
    pub fn media_type(self) -> &'static str {
        match self {
            ManifestKind::Oci => media_type::OCI_MANIFEST,
            ManifestKind::Docker => media_type::DOCKER_MANIFEST,
            ManifestKind::OciIndex => media_type::OCI_INDEX,
            ManifestKind::DockerList => media_type::DOCKER_LIST,
        }
    }

    /// The media type of the other format with the same shape.
    pub fn sibling_media_type(self) -> &'static str {
        match self {
            ManifestKind::Oci => media_type::DOCKER_MANIFEST,
            ManifestKind::Docker => media_type::OCI_MANIFEST,
            ManifestKind::OciIndex => media_type::DOCKER_LIST,
            ManifestKind::DockerList => media_type::OCI_INDEX,
        }
    }

    /// Single-platform kinds reference a config blob.
    pub fn is_single_arch(self) -> bool {
        matches!(self, ManifestKind::Oci | ManifestKind::Docker)
    }
}

/// A manifest as persisted: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    deny_unknown_fields
)]
pub enum StoredManifest {
    /// OCI image manifest
    Oci(ImageManifest),
    /// Docker image manifest
    Docker(ImageManifest),
    /// OCI image index
    OciIndex(ImageIndex),
    /// Docker manifest list
    DockerList(ImageIndex),
}

impl StoredManifest {
    /// Wrap a single-platform manifest with the tag for its format.
    pub fn image(format: ImageFormat, manifest: ImageManifest) -> Self {
        match format {
            ImageFormat::Oci => StoredManifest::Oci(manifest),
            ImageFormat::Docker => StoredManifest::Docker(manifest),
        }
    }

    /// Wrap a multi-platform index with the tag for its format.
    pub fn index(format: ImageFormat, index: ImageIndex) -> Self {
        match format {
            ImageFormat::Oci => StoredManifest::OciIndex(index),
            ImageFormat::Docker => StoredManifest::DockerList(index),
        }
    }

    /// The stored kind tag.
    pub fn kind(&self) -> ManifestKind {
        match self {
            StoredManifest::Oci(_) => ManifestKind::Oci,
            StoredManifest::Docker(_) => ManifestKind::Docker,
            StoredManifest::OciIndex(_) => ManifestKind::OciIndex,
            StoredManifest::DockerList(_) => ManifestKind::DockerList,
        }
    }

    /// The `mediaType` field recorded in the body.
    pub fn body_media_type(&self) -> &str {
        match self {
            StoredManifest::Oci(m) | StoredManifest::Docker(m) => &m.media_type,
            StoredManifest::OciIndex(i) | StoredManifest::DockerList(i) => &i.media_type,
        }
    }

    /// Compact JSON of the body, with the `mediaType` field optionally replaced.
    pub fn to_body(&self, media_type: Option<&str>) -> Result<Vec<u8>, serde_json::Error> {
        match (self, media_type) {
            (StoredManifest::Oci(m) | StoredManifest::Docker(m), Some(mt)) => {
                let mut m = m.clone();
                m.media_type = mt.to_owned();
                serde_json::to_vec(&m)
            }
            (StoredManifest::OciIndex(i) | StoredManifest::DockerList(i), Some(mt)) => {
                let mut i = i.clone();
                i.media_type = mt.to_owned();
                serde_json::to_vec(&i)
            }
            (StoredManifest::Oci(m) | StoredManifest::Docker(m), None) => serde_json::to_vec(m),
            (StoredManifest::OciIndex(i) | StoredManifest::DockerList(i), None) => {
                serde_json::to_vec(i)
            }
        }
    }

    /// The config digest, for single-platform manifests.
    pub fn config_digest(&self) -> Option<&str> {
        match self {
            StoredManifest::Oci(m) | StoredManifest::Docker(m) => Some(&m.config.digest),
            _ => None,
        }
    }

    /// The platform manifests, for multi-platform indexes.
    pub fn children(&self) -> &[PlatformDescriptor] {
        match self {
            StoredManifest::OciIndex(i) | StoredManifest::DockerList(i) => &i.manifests,
            _ => &[],
        }
    }
}

/// A content descriptor: what, where, and how big.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Descriptor {
    /// Media type of the referenced content
    pub media_type: String,
    /// Digest of the referenced content
    pub digest: String,
    /// Size of the referenced content in bytes
    pub size: u64,
}

/// Single-platform image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageManifest {
    /// Always 2
    pub schema_version: u32,
    /// Manifest media type
    pub media_type: String,
    /// Config blob descriptor
    pub config: Descriptor,
    /// Layer descriptors, base layer first
    pub layers: Vec<Descriptor>,
}

/// Platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`
    pub architecture: String,
    /// Operating system, e.g. `linux`
    pub os: String,
}

/// A descriptor inside an index, pointing at one platform's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlatformDescriptor {
    /// Media type of the platform manifest
    pub media_type: String,
    /// Digest of the platform manifest
    pub digest: String,
    /// Size of the platform manifest in bytes
    pub size: u64,
    /// Target platform
    pub platform: Platform,
}

/// Multi-platform image index or manifest list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageIndex {
    /// Always 2
    pub schema_version: u32,
    /// Index media type
    pub media_type: String,
    /// One entry per platform
    pub manifests: Vec<PlatformDescriptor>,
}

/// Serializes as `{}`; used for exposed ports and volumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Empty {}

/// Image config blob, OCI image-spec shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigBlob {
    /// CPU architecture
    pub architecture: String,
    /// Operating system
    pub os: String,
    /// RFC 3339 creation time
    pub created: String,
    /// Runtime configuration
    pub config: RuntimeConfig,
    /// Layer diff ids
    pub rootfs: RootFs,
    /// One entry per build step
    pub history: Vec<History>,
}

/// The `config` section of an image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
#[allow(missing_docs)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, Empty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Empty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Root filesystem description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootFs {
    /// Always `layers`
    #[serde(rename = "type")]
    pub kind: String,
    /// Uncompressed layer digests, base first
    pub diff_ids: Vec<String>,
}

/// One build step in the image history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct History {
    /// RFC 3339 time of the step
    pub created: String,
    /// Command that produced the step
    pub created_by: String,
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Set when the step did not produce a layer
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ImageManifest {
        ImageManifest {
            schema_version: 2,
            media_type: media_type::OCI_MANIFEST.into(),
            config: Descriptor {
                media_type: media_type::OCI_CONFIG.into(),
                digest: crate::digest::digest(b"config"),
                size: 6,
            },
            layers: vec![],
        }
    }

    #[test]
    fn stored_manifest_shape() {
        let stored = StoredManifest::Oci(manifest());
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["type"], "oci");
        assert_eq!(value["data"]["schemaVersion"], 2);
        assert_eq!(value["data"]["config"]["mediaType"], media_type::OCI_CONFIG);

        let index = StoredManifest::DockerList(ImageIndex {
            schema_version: 2,
            media_type: media_type::DOCKER_LIST.into(),
            manifests: vec![],
        });
        assert_eq!(serde_json::to_value(&index).unwrap()["type"], "docker-list");
    }

    #[test]
    fn body_override_only_touches_media_type() {
        let stored = StoredManifest::Oci(manifest());
        let body = stored.to_body(Some(media_type::DOCKER_MANIFEST)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["mediaType"], media_type::DOCKER_MANIFEST);
        assert_eq!(value["config"]["mediaType"], media_type::OCI_CONFIG);
        assert_eq!(stored.body_media_type(), media_type::OCI_MANIFEST);
    }

    #[test]
    fn kind_media_types() {
        assert_eq!(ManifestKind::Oci.sibling_media_type(), media_type::DOCKER_MANIFEST);
        assert_eq!(ManifestKind::DockerList.sibling_media_type(), media_type::OCI_INDEX);
        assert!(ManifestKind::Docker.is_single_arch());
        assert!(!ManifestKind::OciIndex.is_single_arch());
    }

    #[test]
    fn runtime_config_skips_empty_sections() {
        let config = RuntimeConfig {
            cmd: vec!["/bin/sh".into()],
            ..Default::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        assert!(value.get("ExposedPorts").is_none());
        assert!(value.get("User").is_none());
        assert_eq!(value["Cmd"][0], "/bin/sh");
        assert!(value.get("Labels").is_none());
        assert!(value.get("Env").is_none());
    }

    #[test]
    fn absent_config_sections_round_trip() {
        let document = br#"{"Cmd":["/bin/sh"]}"#;
        let config: RuntimeConfig = serde_json::from_slice(document).unwrap();
        assert_eq!(serde_json::to_vec(&config).unwrap(), document);

        assert!(serde_json::from_slice::<ConfigBlob>(br#"{"author":"someone"}"#).is_err());
    }
}

//! Server configuration file

use std::net::SocketAddr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, multi-line events
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Settings for `registry-sim serve`, read from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: SocketAddr,
    /// Path of the persisted registry document
    pub database: Utf8PathBuf,
    /// Delay added to every request, in milliseconds
    pub throttle_ms: Option<u64>,
    /// Seed for the random source used by push
    pub seed: Option<u64>,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database: Utf8PathBuf::from("registry.json"),
            throttle_ms: None,
            seed: None,
            log_format: LogFormat::default(),
        }
    }
}

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("reading {path}")]
    Io {
        /// Configuration file path
        path: Utf8PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid configuration
    #[error("parsing {path}")]
    Parse {
        /// Configuration file path
        path: Utf8PathBuf,
        /// Underlying error
        #[source]
        source: toml_edit::de::Error,
    },
}

impl ServerConfig {
    /// Parse a configuration document.
    pub fn from_toml(document: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(document)
    }

    /// Read a configuration file.
    pub async fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;

        Self::from_toml(&document).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Per-request delay, if any.
    pub fn throttle(&self) -> Option<Duration> {
        self.throttle_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen.port(), 5000);
        assert!(config.throttle().is_none());
    }

    #[test]
    fn full_file() {
        let config = ServerConfig::from_toml(
            r#"
            listen = "0.0.0.0:8080"
            database = "/var/lib/registry/db.json"
            throttle_ms = 250
            seed = 42
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.database, "/var/lib/registry/db.json");
        assert_eq!(config.throttle(), Some(Duration::from_millis(250)));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ServerConfig::from_toml("port = 5000").is_err());
    }

    #[tokio::test]
    async fn missing_file_names_path() {
        let err = ServerConfig::load(Utf8Path::new("/nonexistent/registry.toml"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "reading /nonexistent/registry.toml");
    }
}

//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use polyreel::config::{Config, LogFormat, LoggingConfig};

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    version: String,
    database_path: Option<PathBuf>,
    lock_lease_seconds: Option<u64>,
    logging: LoggingConfig,
    default_languages: Vec<String>,
}

impl ConfigBuilder {
    /// Create a new builder with sensible defaults for testing.
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            lock_lease_seconds: None,
            logging: LoggingConfig {
                level: "warn".to_string(),
                format: LogFormat::Text,
            },
            default_languages: vec!["en".to_string()],
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn database_path(mut self, path: &Path) -> Self {
        self.database_path = Some(path.to_path_buf());
        self
    }

    pub fn lock_lease_seconds(mut self, seconds: u64) -> Self {
        self.lock_lease_seconds = Some(seconds);
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.logging.level = level.to_string();
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.logging.format = format;
        self
    }

    pub fn default_languages(mut self, languages: &[&str]) -> Self {
        self.default_languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Build the final `Config`.
    pub fn build(self) -> Config {
        Config {
            version: self.version,
            database_path: self.database_path,
            lock_lease_seconds: self.lock_lease_seconds,
            logging: self.logging,
            default_languages: self.default_languages,
        }
    }

    /// Serialize the config to pretty JSON, as an operator would write it.
    pub fn to_json(self) -> String {
        serde_json::to_string_pretty(&self.build()).expect("Failed to serialize config")
    }

    /// Write the config as JSON to `path` and return the path.
    pub fn write_to(self, path: &Path) -> PathBuf {
        std::fs::write(path, self.to_json()).expect("Failed to write config file");
        path.to_path_buf()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

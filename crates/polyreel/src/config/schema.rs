use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file; `None` means [`crate::db::default_database_path`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Lock lease in seconds. Absent means locks never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_lease_seconds: Option<u64>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub default_languages: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            lock_lease_seconds: None,
            logging: LoggingConfig::default(),
            default_languages: Vec::new(),
        }
    }
}

impl Config {
    pub fn lock_lease(&self) -> Option<chrono::Duration> {
        self.lock_lease_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: Config = serde_json::from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.lock_lease().is_none());
    }

    #[test]
    fn test_lock_lease_conversion() {
        let config = Config {
            lock_lease_seconds: Some(90),
            ..Default::default()
        };
        assert_eq!(config.lock_lease(), Some(chrono::Duration::seconds(90)));
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::formatter::parse_go_duration;
use crate::core::models::report::ServiceItem;

/// Window length used when neither the caller nor the config names one.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid duration '{0}' in cost config")]
    InvalidDuration(String),
    #[error("problem setting up config: {0}")]
    InvalidStore(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    /// Directory exported reports are written into.
    #[serde(default)]
    pub directory: String,
    /// Default window length, Go duration syntax.
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvergreenConnection {
    #[serde(default)]
    pub root_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub key: String,
    /// Restrict the project breakdown to these identifiers.
    #[serde(default)]
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub items: Vec<ServiceItem>,
}

/// Cost reporting configuration. Immutable for the duration of a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default)]
    pub options: ReportOptions,
    #[serde(default)]
    pub evergreen: EvergreenConnection,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl CostConfig {
    /// Default config file path, respecting XDG_CONFIG_HOME.
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("fleetcost").join("cost.toml")
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize and write this config to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the effective window length. A nonzero explicit duration wins,
    /// then `options.duration`, then one hour.
    pub fn duration_for(&self, explicit: Option<Duration>) -> Result<Duration, ConfigError> {
        if let Some(d) = explicit.filter(|d| !d.is_zero()) {
            return Ok(d);
        }
        if self.options.duration.trim().is_empty() {
            return Ok(DEFAULT_DURATION);
        }
        match parse_go_duration(&self.options.duration) {
            Some(d) if !d.is_zero() => Ok(d),
            _ => Err(ConfigError::InvalidDuration(self.options.duration.clone())),
        }
    }

    /// Directory exported reports land in.
    pub fn output_dir(&self) -> PathBuf {
        if self.options.directory.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.options.directory)
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.options.duration.trim().is_empty() && self.duration_for(None).is_err() {
            issues.push(format!(
                "Invalid options.duration: '{}' (expected e.g. '1h' or '90m')",
                self.options.duration
            ));
        }
        if self.evergreen.root_url.is_empty() {
            issues.push("Missing evergreen.root_url".to_string());
        } else if let Err(e) = validate_endpoint(&self.evergreen.root_url, "evergreen") {
            issues.push(e);
        }
        for p in &self.providers {
            if p.name.trim().is_empty() {
                issues.push("Provider with empty name".to_string());
            }
            for a in &p.accounts {
                if a.name.trim().is_empty() {
                    issues.push(format!("Provider '{}': account with empty name", p.name));
                }
                for s in &a.services {
                    for item in &s.items {
                        if item.fixed_price < 0.0
                            || item.avg_price < 0.0
                            || item.avg_uptime < 0.0
                            || item.total_hours < 0
                        {
                            issues.push(format!(
                                "Provider '{}' account '{}' service '{}': item '{}' has negative pricing",
                                p.name, a.name, s.name, item.name
                            ));
                        }
                    }
                }
            }
        }
        issues
    }
}

/// Validate that an API root uses HTTPS. Plain HTTP is only accepted for
/// loopback hosts so credentials never leave the machine unencrypted.
pub fn validate_endpoint(url: &str, name: &str) -> Result<(), String> {
    if url.starts_with("https://") {
        return Ok(());
    }
    if let Some(rest) = url.strip_prefix("http://") {
        let host = rest.split(['/', ':']).next().unwrap_or_default();
        if host == "localhost" || host == "127.0.0.1" {
            return Ok(());
        }
    }
    Err(format!("{}: endpoint must use HTTPS, got: {}", name, url))
}

/// Connection settings for the report store and the local work queue.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub uri: String,
    pub database: String,
    pub workers: usize,
}

impl StoreOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.uri.starts_with("mongodb://") || self.uri.starts_with("mongodb+srv://")) {
            return Err(ConfigError::InvalidStore(format!(
                "invalid mongodb uri '{}'",
                self.uri
            )));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::InvalidStore(
                "mongodb database name must not be empty".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidStore(
                "number of workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

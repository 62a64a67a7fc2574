use crate::export::{DEFAULT_DELIMITER, DEFAULT_PAGE_LINES};
use crate::session::FileTokenStore;
use crate::sync::DEFAULT_INTERVAL;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Remote service location
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Where the bearer token is kept between runs
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub token_path: Option<String>,
    /// false keeps the token in memory only
    #[serde(default)]
    pub persist: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ExportConfig {
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub page_lines: Option<usize>,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.p2p/config.local.toml) > project (.p2p/config.toml) > user (~/.p2p/config.toml)
    pub fn load() -> Result<Self> {
        Self::load_layers(dirs::home_dir().as_deref(), Path::new("."))
    }

    pub fn load_layers(home: Option<&Path>, project_root: &Path) -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = home {
            let user_config = home.join(".p2p").join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_dir = project_root.join(".p2p");
        let project_config = project_dir.join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Should be gitignored
        let local_config = project_dir.join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merge another config into this one; values set in `other` win
    pub fn merge(&mut self, other: Config) {
        if other.api.base_url.is_some() {
            self.api.base_url = other.api.base_url;
        }
        if other.api.timeout_ms.is_some() {
            self.api.timeout_ms = other.api.timeout_ms;
        }
        if other.sync.interval_secs.is_some() {
            self.sync.interval_secs = other.sync.interval_secs;
        }
        if other.session.token_path.is_some() {
            self.session.token_path = other.session.token_path;
        }
        if other.session.persist.is_some() {
            self.session.persist = other.session.persist;
        }
        if other.export.delimiter.is_some() {
            self.export.delimiter = other.export.delimiter;
        }
        if other.export.page_lines.is_some() {
            self.export.page_lines = other.export.page_lines;
        }
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.api.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INTERVAL)
    }

    pub fn persist_session(&self) -> bool {
        self.session.persist.unwrap_or(true)
    }

    pub fn token_path(&self) -> Option<PathBuf> {
        match &self.session.token_path {
            Some(path) => Some(PathBuf::from(path)),
            None => FileTokenStore::default_path(),
        }
    }

    pub fn delimiter(&self) -> char {
        self.export
            .delimiter
            .as_deref()
            .and_then(|d| d.chars().next())
            .unwrap_or(DEFAULT_DELIMITER)
    }

    pub fn page_lines(&self) -> usize {
        self.export.page_lines.unwrap_or(DEFAULT_PAGE_LINES)
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.base_url();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", base_url),
            });
        }

        if self.api.timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.sync.interval_secs == Some(0) {
            errors.push(ValidationError {
                field: "sync.interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Some(delimiter) = &self.export.delimiter {
            let mut chars = delimiter.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c != '"' && c != '\n' && c != '\r' => {}
                _ => errors.push(ValidationError {
                    field: "export.delimiter".to_string(),
                    message: format!(
                        "Must be a single character other than a quote or newline, got '{}'",
                        delimiter
                    ),
                }),
            }
        }

        if self.export.page_lines == Some(0) {
            errors.push(ValidationError {
                field: "export.page_lines".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

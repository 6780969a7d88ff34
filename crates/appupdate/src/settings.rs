use std::path::{Path, PathBuf};
use std::time::Duration;

use appupdate_core::{CheckerConfig, InstalledVersion, SourceConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("No settings file at {}; run `appupdate init` to create one", .path.display())]
    NotFound { path: PathBuf },
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub source: SourceConfig,

    pub installed_version_name: String,

    #[serde(default)]
    pub installed_version_code: u64,

    #[serde(default = "default_show_every")]
    pub show_every: i64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_show_every() -> i64 {
    1
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    10
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl AppSettings {
    /// Settings written by `appupdate init`, meant to be edited by hand.
    #[must_use]
    pub fn template() -> Self {
        Self {
            source: SourceConfig::ReleaseFeed {
                owner: "owner".to_string(),
                repo: "repo".to_string(),
                api_base: None,
            },
            installed_version_name: "0.1.0".to_string(),
            installed_version_code: 0,
            show_every: default_show_every(),
            fetch_timeout_secs: default_fetch_timeout(),
            http_timeout_secs: default_http_timeout(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SettingsError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_error = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(io_error)
    }

    pub fn checker_config(&self) -> CheckerConfig {
        let mut config = CheckerConfig::new(
            self.source.clone(),
            InstalledVersion::new(&self.installed_version_name, self.installed_version_code),
            self.show_every,
        );
        config.fetch_timeout = Duration::from_secs(self.fetch_timeout_secs);
        config
    }

    pub fn http_client(&self) -> Result<reqwest::Client, SettingsError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .user_agent(concat!("appupdate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SettingsError::HttpClient)
    }
}

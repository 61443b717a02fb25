//! Configuration management for Sharecast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Public URL the OAuth redirect URI is derived from
    pub base_url: String,
    /// Where the connect flow returns when the caller gave no return URL
    pub default_return_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            base_url: "http://127.0.0.1:8080".to_string(),
            default_return_url: "/accounts".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn redirect_uri(&self) -> Result<Url> {
        let base = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidValue {
            field: "server.base_url".to_string(),
            reason: e.to_string(),
        })?;
        base.join("/accounts/callback")
            .map_err(|e| {
                ConfigError::InvalidValue {
                    field: "server.base_url".to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("sharecast/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval_secs: u64,
    /// How long a share stays claimed by a worker before others may take it over
    pub lease_secs: u64,
    /// Interval of the pending-entries sweep run by the daemon (0 disables it)
    pub sweep_interval_secs: u64,
    pub max_attempts: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval_secs: 5,
            lease_secs: 300,
            sweep_interval_secs: 60,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// Tokens valid for longer than this are skipped by the refresh sweep
    pub refresh_window_days: i64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            refresh_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: String,
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/sharecast/sharecast.db".to_string(),
            },
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            worker: WorkerConfig::default(),
            tokens: TokensConfig::default(),
            logging: LoggingSection::default(),
        }
    }

    /// Configuration rooted in a scratch database, used by tests and tooling
    pub fn for_database(path: impl Into<String>) -> Self {
        let mut config = Self::default_config();
        config.database.path = path.into();
        config
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker.concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        self.server.redirect_uri()?;
        Ok(())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SHARECAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("sharecast").join("config.toml"))
}

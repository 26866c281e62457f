//! Server configuration.
//!
//! Loaded from a TOML file; missing keys fall back to defaults. The provider
//! credential is deliberately not part of the file and is read from the
//! environment variable named by `api_key_env`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::queue::QueueConfig;

/// Configuration file name.
pub const CONFIG_FILE: &str = "tileforge-server.toml";

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "TILEFORGE_CONFIG";

/// Server configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // === Network ===
    /// Listen address
    pub bind: SocketAddr,

    // === Storage ===
    /// SQLite database file
    pub database_path: PathBuf,
    /// Directory holding downloaded assets
    pub asset_dir: PathBuf,

    // === Provider ===
    /// Provider API base URL
    pub provider_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// HTTP timeout for a single provider request, seconds
    pub request_timeout_secs: u64,
    /// Seconds between operation polls
    pub poll_interval_secs: u64,

    // === Queue ===
    /// Maximum concurrent generation jobs
    pub concurrency: usize,
    /// Dispatch pause after a rate-limit response, seconds
    pub rate_limit_backoff_secs: u64,
    /// Hard limit on one job's duration, seconds
    pub job_timeout_secs: u64,

    // === World ===
    /// Prompt used when a request names none
    pub default_prompt: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),

            database_path: PathBuf::from("data/chunks.db"),
            asset_dir: PathBuf::from("data/chunks"),

            provider_url: "https://api.worldlabs.ai/marble/v1".to_string(),
            api_key_env: "WLT_API_KEY".to_string(),
            request_timeout_secs: 60,
            poll_interval_secs: 5,

            concurrency: 1,
            rate_limit_backoff_secs: 60,
            job_timeout_secs: 15 * 60,

            default_prompt: "a quiet alpine meadow at dawn".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `TILEFORGE_CONFIG` or the working directory.
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
        Self::load_from(path)
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut config) => {
                    config.validate();
                    info!("Loaded config from {}", path.display());
                    config
                },
                Err(e) => {
                    warn!("Failed to parse config file: {e}");
                    Self::default()
                },
            },
            Err(e) => {
                warn!("Failed to read config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp values to sensible ranges.
    pub fn validate(&mut self) {
        self.concurrency = self.concurrency.clamp(1, 16);
        self.poll_interval_secs = self.poll_interval_secs.clamp(1, 120);
        self.request_timeout_secs = self.request_timeout_secs.clamp(5, 600);
        self.rate_limit_backoff_secs = self.rate_limit_backoff_secs.clamp(1, 3600);
        self.job_timeout_secs = self.job_timeout_secs.clamp(60, 24 * 3600);
        if self.default_prompt.trim().is_empty() {
            self.default_prompt = Self::default().default_prompt;
        }
    }

    /// Provider API key from the environment, if set and non-empty.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Queue tuning derived from this config.
    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.concurrency,
            rate_limit_backoff: Duration::from_secs(self.rate_limit_backoff_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }

    /// Provider operation poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-request provider timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

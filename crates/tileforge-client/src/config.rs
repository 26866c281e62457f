//! Client configuration.
//!
//! Same file conventions as the server: TOML, every key optional, invalid
//! files fall back to defaults with a warning.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "tileforge-client.toml";

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "TILEFORGE_CONFIG";

/// Look-ahead tuning for the predictive fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Update ticks between recomputations
    pub interval_ticks: u32,
    /// Ground speed below which only cardinal neighbours are fetched
    pub speed_threshold: f32,
    /// Worst-case generation latency, seconds
    pub worst_case_latency_secs: f32,
    /// Minimum look-ahead, chunks
    pub min_reach: u32,
    /// Maximum look-ahead, chunks
    pub max_reach: u32,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            interval_ticks: 30,
            speed_threshold: 0.5,
            worst_case_latency_secs: 60.0,
            min_reach: 1,
            max_reach: 4,
        }
    }
}

/// Client configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // === Server ===
    /// Chunk API base URL
    pub server_url: String,
    /// Prompt to stream; empty uses the server's default
    pub prompt: String,
    /// HTTP timeout for one API call, seconds
    pub request_timeout_secs: u64,

    // === Grid ===
    /// World-space edge length of one chunk
    pub tile_size: f32,
    /// Chebyshev radius kept fully visible
    pub active_radius: u32,
    /// Chebyshev radius kept resident (hidden beyond `active_radius`)
    pub cached_radius: u32,

    // === Requests ===
    /// Maximum concurrently pending loads
    pub max_pending: usize,
    /// Seconds before a failed coordinate may be requested again
    pub retry_cooldown_secs: u64,
    /// Seconds between status polls of one chunk
    pub poll_interval_secs: u64,
    /// Polls before a load gives up
    pub max_poll_attempts: u32,

    // === Presentation ===
    /// Fade change per second
    pub fade_rate: f32,

    /// Predictive fetch settings
    pub prefetch: PrefetchConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            prompt: String::new(),
            request_timeout_secs: 30,

            tile_size: 20.0,
            active_radius: 1,
            cached_radius: 3,

            max_pending: 4,
            retry_cooldown_secs: 10,
            poll_interval_secs: 3,
            max_poll_attempts: 200,

            fade_rate: 1.5,

            prefetch: PrefetchConfig::default(),
        }
    }
}

impl ClientConfig {
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
        if !(self.tile_size.is_finite() && self.tile_size > 0.0) {
            self.tile_size = Self::default().tile_size;
        }
        self.active_radius = self.active_radius.min(8);
        // Cached ring must lie strictly outside the active ring.
        self.cached_radius = self.cached_radius.clamp(self.active_radius + 1, 16);
        self.max_pending = self.max_pending.clamp(1, 64);
        self.poll_interval_secs = self.poll_interval_secs.clamp(1, 60);
        self.max_poll_attempts = self.max_poll_attempts.max(1);
        self.fade_rate = self.fade_rate.clamp(0.1, 20.0);

        let prefetch = &mut self.prefetch;
        prefetch.interval_ticks = prefetch.interval_ticks.max(1);
        prefetch.speed_threshold = prefetch.speed_threshold.max(0.0);
        prefetch.worst_case_latency_secs = prefetch.worst_case_latency_secs.max(0.0);
        prefetch.min_reach = prefetch.min_reach.max(1);
        prefetch.max_reach = prefetch.max_reach.clamp(prefetch.min_reach, 32);
    }

    /// Delay between status polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Window during which a failed coordinate is not re-requested.
    #[must_use]
    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

//! Configuration management.
//!
//! volley configuration can come from:
//! - Environment variables (VOLLEY_*)
//! - Config file (~/.config/volley/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// volley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Plan store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Run defaults
    #[serde(default)]
    pub run: RunConfig,
}

/// Plan store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL for the distributed plan store. Unset means in-memory only.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix plans are stored under.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    "volley/plans/".to_string()
}

/// Defaults applied to runs started from the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Operations per second across all leaves. Unset means unthrottled.
    #[serde(default)]
    pub rate: Option<f64>,

    /// Burst allowance for the rate limiter.
    #[serde(default)]
    pub burst: Option<u64>,
}

impl Config {
    /// Load configuration from the default location with env overrides.
    pub fn load() -> Self {
        let mut config = Self::default();

        let path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("volley"))
            .unwrap_or_else(|| PathBuf::from(".volley"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("VOLLEY_REDIS_URL") {
            self.store.redis_url = Some(url);
        }
        if let Ok(prefix) = std::env::var("VOLLEY_KEY_PREFIX") {
            self.store.key_prefix = prefix;
        }
        if let Ok(rate) = std::env::var("VOLLEY_RATE") {
            if let Ok(parsed) = rate.parse::<f64>() {
                self.run.rate = Some(parsed);
            }
        }
        if let Ok(burst) = std::env::var("VOLLEY_BURST") {
            if let Ok(parsed) = burst.parse::<u64>() {
                self.run.burst = Some(parsed);
            }
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(store) = partial.store {
            self.store = store;
        }
        if let Some(run) = partial.run {
            self.run = run;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    store: Option<StoreConfig>,
    run: Option<RunConfig>,
}

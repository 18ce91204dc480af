//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_UPSTREAM_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_APP_URL: &str = "http://localhost:3000";
pub const DEFAULT_APP_TITLE: &str = "AI Model Comparison App";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Paths to all Chorus data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// SQLite directory (`data/db/`).
    pub db: PathBuf,
    /// Model catalog overrides (`data/models.json`).
    pub models_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            db: root.join("db"),
            models_file: root.join("models.json"),
            root,
        };
        std::fs::create_dir_all(&paths.db)?;
        Ok(paths)
    }
}

/// Settings for the upstream chat-completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Chat-completion endpoint.
    pub api_url: String,
    /// Bearer credential. Never serialized.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    /// Sent as `HTTP-Referer`.
    pub referer: String,
    /// Sent as `X-Title`.
    pub title: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Per-call transport timeout.
    pub timeout_secs: u64,
    /// Cap on in-flight upstream calls for one aggregate. `None` is uncapped.
    pub max_concurrency: Option<usize>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_UPSTREAM_URL.into(),
            api_key: None,
            referer: DEFAULT_APP_URL.into(),
            title: DEFAULT_APP_TITLE.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_concurrency: None,
        }
    }
}

impl UpstreamConfig {
    /// Read upstream settings from the environment, keeping defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: env_string("OPENROUTER_API_URL").unwrap_or(defaults.api_url),
            api_key: env_string("OPENROUTER_API_KEY"),
            referer: env_string("CHORUS_APP_URL").unwrap_or(defaults.referer),
            title: env_string("CHORUS_APP_TITLE").unwrap_or(defaults.title),
            max_tokens: env_parse("CHORUS_MAX_TOKENS").unwrap_or(defaults.max_tokens),
            temperature: env_parse("CHORUS_TEMPERATURE").unwrap_or(defaults.temperature),
            timeout_secs: env_nonzero("CHORUS_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            max_concurrency: env_nonzero("CHORUS_MAX_CONCURRENCY"),
        }
    }

    /// The credential, if one is configured and non-empty.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Top-level Chorus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    pub upstream: UpstreamConfig,
}

impl ChorusConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let port = env_parse("PORT").unwrap_or(DEFAULT_PORT);
        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            port,
            data_paths,
            upstream: UpstreamConfig::from_env(),
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse().ok())
}

/// Zero means "unset" for counts and durations.
fn env_nonzero<T: std::str::FromStr + Default + PartialEq>(key: &str) -> Option<T> {
    env_parse(key).filter(|n: &T| *n != T::default())
}

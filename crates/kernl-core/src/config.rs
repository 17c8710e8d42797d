//! Runtime configuration
//!
//! Parsed from `~/.kernl/config.toml` (or an explicit path), with
//! environment variable overrides applied on top. Every field has a
//! default, so a missing file is not an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::engine;
use crate::paths;

/// Engine and storage settings shared by `Kernl` and every `Thread` it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernlConfig {
    /// Maximum model round-trips in a single execution
    pub max_ticks: u32,
    /// Consecutive ticks without tool calls or assistant text that are tolerated
    pub max_empty_ticks: u32,
    /// Capacity of the bounded stream channel handed to callers
    pub stream_buffer: usize,
    /// Per-call tool timeout
    pub tool_timeout_secs: u64,
    /// Maximum silence between model stream items
    pub model_idle_timeout_secs: u64,
    /// Storage lease lifetime for the single-writer guarantee
    pub lease_ttl_secs: u64,
    /// SQLite database path; `None` means the default under the config dir
    pub database_path: Option<PathBuf>,
}

impl Default for KernlConfig {
    fn default() -> Self {
        Self {
            max_ticks: engine::MAX_TICKS,
            max_empty_ticks: engine::MAX_EMPTY_TICKS,
            stream_buffer: engine::STREAM_BUFFER,
            tool_timeout_secs: engine::TOOL_TIMEOUT_SECS,
            model_idle_timeout_secs: engine::MODEL_IDLE_TIMEOUT_SECS,
            lease_ttl_secs: engine::LEASE_TTL_SECS,
            database_path: None,
        }
    }
}

impl KernlConfig {
    /// Load config from a TOML file. A missing file yields defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No kernl config found at {:?}", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        tracing::info!(path = ?path, "Loaded kernl config");
        Ok(config)
    }

    /// Load `~/.kernl/config.toml` and apply environment overrides.
    pub async fn load_default() -> Result<Self> {
        let mut config = Self::load(&paths::config_file()).await?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `KERNL_*` environment overrides. Unparseable values are ignored
    /// with a warning rather than failing startup.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let raw = value?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring invalid config override");
                    None
                }
            }
        }

        if let Some(v) = parse("KERNL_MAX_TICKS", lookup("KERNL_MAX_TICKS")) {
            self.max_ticks = v;
        }
        if let Some(v) = parse("KERNL_MAX_EMPTY_TICKS", lookup("KERNL_MAX_EMPTY_TICKS")) {
            self.max_empty_ticks = v;
        }
        if let Some(v) = parse("KERNL_TOOL_TIMEOUT_SECS", lookup("KERNL_TOOL_TIMEOUT_SECS")) {
            self.tool_timeout_secs = v;
        }
        if let Some(v) = parse(
            "KERNL_MODEL_IDLE_TIMEOUT_SECS",
            lookup("KERNL_MODEL_IDLE_TIMEOUT_SECS"),
        ) {
            self.model_idle_timeout_secs = v;
        }
        if let Some(path) = lookup("KERNL_DB_PATH").filter(|p| !p.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn model_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.model_idle_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Resolved database path (explicit setting or the default location)
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(paths::default_database_path)
    }
}

use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{model::Unit, provider::ProviderId};

/// Cache key used when the location is resolved automatically.
pub const AUTO_KEY: &str = "auto";

pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 4;
const MIN_HTTP_TIMEOUT_SECS: u64 = 2;
const MAX_HTTP_TIMEOUT_SECS: u64 = 5;

/// How the location is chosen when the query text is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationMode {
    #[default]
    Auto,
    Manual,
}

/// Verbosity of rendered results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Compact,
    Detailed,
}

impl fmt::Display for LocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LocationMode::Auto => "auto",
            LocationMode::Manual => "manual",
        })
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisplayMode::Compact => "compact",
            DisplayMode::Detailed => "detailed",
        })
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// provider = "aggregator"
/// api_key = "..."
/// unit = "c"
/// location_mode = "manual"
/// static_location = "Lisbon"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderId,

    /// Required by the aggregator, ignored by the daily service.
    pub api_key: Option<String>,

    /// Tried after `provider` when it fails for a reason other than "not found".
    pub fallback_provider: Option<ProviderId>,

    pub unit: Unit,
    pub location_mode: LocationMode,

    /// Used when `location_mode = "manual"` and no query text is given.
    pub static_location: Option<String>,

    pub display: DisplayMode,
    pub cache_ttl_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderId::DailyService,
            api_key: None,
            fallback_provider: None,
            unit: Unit::default(),
            location_mode: LocationMode::default(),
            static_location: None,
            display: DisplayMode::default(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "whereami", "whereami")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Where the weather cache is persisted between runs.
    pub fn cache_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.cache_dir().join("weather_cache.json"))
    }

    /// API key, if present and not blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn set_api_key(&mut self, api_key: String) {
        let trimmed = api_key.trim();
        self.api_key = if trimmed.is_empty() { None } else { Some(trimmed.to_string()) };
    }

    /// Location text to look up, or `None` when the location should be resolved automatically.
    ///
    /// Non-empty query text always wins; otherwise manual mode uses `static_location`.
    pub fn effective_query(&self, query: &str) -> Option<String> {
        let query = query.trim();
        if !query.is_empty() {
            return Some(query.to_string());
        }

        match self.location_mode {
            LocationMode::Auto => None,
            LocationMode::Manual => self
                .static_location
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    /// Cache key for a query: `"auto"` for automatic location, else the lower-cased text.
    pub fn cache_key(&self, query: &str) -> String {
        self.effective_query(query)
            .map(|q| q.to_lowercase())
            .unwrap_or_else(|| AUTO_KEY.to_string())
    }

    pub fn ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    /// Per-request HTTP timeout, kept within 2..=5 seconds.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(
            self.http_timeout_secs
                .clamp(MIN_HTTP_TIMEOUT_SECS, MAX_HTTP_TIMEOUT_SECS),
        )
    }
}

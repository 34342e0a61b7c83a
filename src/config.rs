//! Run configuration.
//!
//! Loaded from `<config_dir>/lotwatch/config.toml` (or `--config`); every
//! section and field is optional. Command-line flags are applied on top and
//! the result is handed to the driver and engine when they are built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, info};

use crate::cli::{AcquireArgs, Cli, EnrichArgs};
use crate::enrich::lookup::MAX_DECODE_BATCH;
use crate::store::{self, StoreError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub acquire: AcquireConfig,
    pub enrich: EnrichConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub zip: String,
    pub radius: u32,
    pub min_year: Option<i32>,
    pub localization: String,
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            zip: "33186".to_string(),
            radius: 50,
            min_year: None,
            localization: "country".to_string(),
            base_url: "https://www.autotempest.com/results".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn url(&self) -> String {
        let mut url = format!(
            "{}?localization={}&zip={}&radius={}",
            self.base_url, self.localization, self.zip, self.radius
        );
        if let Some(year) = self.min_year {
            url.push_str(&format!("&minyear={year}"));
        }
        url
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    pub max_retries: u32,
    #[serde(deserialize_with = "duration")]
    pub round_delay_min: Duration,
    #[serde(deserialize_with = "duration")]
    pub round_delay_max: Duration,
    #[serde(deserialize_with = "duration")]
    pub idle_timeout: Duration,
    /// Substring a captured response url must contain to be extracted.
    pub capture_filter: String,
    /// Discard the surface's captured events every N rounds; 0 never does.
    pub capture_cleanup_interval: u32,
    pub headless: bool,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        AcquireConfig {
            max_retries: 3,
            round_delay_min: Duration::from_millis(2100),
            round_delay_max: Duration::from_millis(4500),
            idle_timeout: Duration::from_secs(30),
            capture_filter: "queue-results".to_string(),
            capture_cleanup_interval: 1,
            headless: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub workers: usize,
    #[serde(deserialize_with = "duration")]
    pub rate_limit: Duration,
    pub batch_size: usize,
    #[serde(deserialize_with = "duration")]
    pub request_timeout: Duration,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        EnrichConfig {
            workers: 4,
            rate_limit: Duration::from_millis(500),
            batch_size: MAX_DECODE_BATCH,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EnrichConfig {
    /// Batch size within what the decode service accepts.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_DECODE_BATCH)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn db_path(&self) -> Result<PathBuf, StoreError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => store::default_db_path(),
        }
    }
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

/// `<config_dir>/lotwatch/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lotwatch").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load from an explicit path, which must exist, or from the default
    /// location when present. Falls back to defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => {
                    debug!("no config file found, using defaults");
                    return Ok(Config::default());
                }
            },
        };

        let config = Self::from_file(&path)?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enrich.workers == 0 {
            return Err(ConfigError::Invalid("enrich.workers must be > 0".to_string()));
        }

        if self.acquire.round_delay_min > self.acquire.round_delay_max {
            return Err(ConfigError::Invalid(
                "acquire.round_delay_min must not exceed round_delay_max".to_string(),
            ));
        }

        if self.search.zip.trim().is_empty() {
            return Err(ConfigError::Invalid("search.zip must not be empty".to_string()));
        }

        Ok(())
    }

    /// Global flags shared by every command.
    pub fn apply_global_args(&mut self, cli: &Cli) {
        if let Some(db) = &cli.db {
            self.store.path = Some(db.clone());
        }
    }

    pub fn apply_acquire_args(&mut self, args: &AcquireArgs) {
        if let Some(zip) = &args.zip {
            self.search.zip = zip.clone();
        }
        if let Some(radius) = args.radius {
            self.search.radius = radius;
        }
        if let Some(year) = args.min_year {
            self.search.min_year = Some(year);
        }
        if args.no_delay {
            self.acquire.round_delay_min = Duration::ZERO;
            self.acquire.round_delay_max = Duration::ZERO;
        }
    }

    pub fn apply_enrich_args(&mut self, args: &EnrichArgs) -> Result<(), ConfigError> {
        if let Some(workers) = args.workers {
            self.enrich.workers = workers;
        }
        if let Some(rate_limit) = &args.rate_limit {
            self.enrich.rate_limit = humantime::parse_duration(rate_limit)
                .map_err(|e| ConfigError::Invalid(format!("--rate-limit '{rate_limit}': {e}")))?;
        }
        if let Some(batch_size) = args.batch_size {
            self.enrich.batch_size = batch_size;
        }
        self.validate()
    }
}

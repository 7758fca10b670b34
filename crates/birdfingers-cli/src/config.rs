use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use birdfingers_index::DEFAULT_INDEX_URL;
use birdfingers_store::DataLayout;
use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

pub const DATA_DIR_ENV: &str = "BIRDFINGERS_DATA_DIR";
pub const PYTHON_ENV: &str = "BIRDFINGERS_PYTHON";
pub const INDEX_URL_ENV: &str = "BIRDFINGERS_INDEX_URL";

const DEFAULT_POLL_INTERVAL_MS: u64 = 600;
const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 120;

/// Optional `birdfingers.toml` inside the data directory.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub python: Option<String>,
    pub index_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub capture_timeout_secs: Option<u64>,
    pub job_retention_secs: Option<u64>,
    pub log_level: Option<String>,
}

/// Values given on the command line; they beat everything else.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub python: Option<String>,
    pub index_url: Option<String>,
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub python: String,
    pub index_url: String,
    pub poll_interval: Duration,
    pub capture_timeout: Duration,
    pub job_retention: Option<Duration>,
    pub log_level: LevelFilter,
}

impl Settings {
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    pub fn load(overrides: &Overrides) -> Result<Self> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Flags, then `env`, then the data directory's config file, then
    /// defaults.
    pub fn resolve(overrides: &Overrides, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match overrides
            .data_dir
            .clone()
            .or_else(|| non_empty(env(DATA_DIR_ENV)).map(PathBuf::from))
        {
            Some(data_dir) => data_dir,
            None => default_data_dir(&env)?,
        };

        let file = load_config_file(&DataLayout::new(&data_dir).config_path())?;

        let python = overrides
            .python
            .clone()
            .or_else(|| non_empty(env(PYTHON_ENV)))
            .or(file.python)
            .unwrap_or_else(|| default_python().to_string());
        let index_url = overrides
            .index_url
            .clone()
            .or_else(|| non_empty(env(INDEX_URL_ENV)))
            .or(file.index_url)
            .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string());

        let log_level = match (overrides.verbose, file.log_level.as_deref()) {
            (0, Some(level)) => level
                .parse::<LevelFilter>()
                .map_err(|_| anyhow!("invalid log_level '{level}' in config file"))?,
            (0, None) => LevelFilter::WARN,
            (1, _) => LevelFilter::INFO,
            (2, _) => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };

        Ok(Self {
            data_dir,
            python,
            index_url,
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS).max(1),
            ),
            capture_timeout: Duration::from_secs(
                file.capture_timeout_secs
                    .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_SECS)
                    .max(1),
            ),
            job_retention: file.job_retention_secs.map(Duration::from_secs),
            log_level,
        })
    }
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed parsing config: {}", path.display()))
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = non_empty(env("LOCALAPPDATA"))
            .context("LOCALAPPDATA is not set; cannot resolve data directory")?;
        return Ok(PathBuf::from(app_data).join("Birdfingers"));
    }

    let home = non_empty(env("HOME")).context("HOME is not set; cannot resolve data directory")?;
    Ok(PathBuf::from(home).join(".birdfingers"))
}

fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

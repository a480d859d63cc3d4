use crate::batch::BatchOptions;
use crate::client::RetryPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the worker pool size
const ENV_MAX_WORKERS: &str = "NETSURVEY_MAX_WORKERS";

/// Environment variable overriding the per-device timeout, in seconds
const ENV_OPERATION_TIMEOUT: &str = "NETSURVEY_OPERATION_TIMEOUT_SECS";

/// Environment variable overriding the rate-limit retry count
const ENV_MAX_RETRIES: &str = "NETSURVEY_MAX_RETRIES";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    retry: Option<RetrySection>,
    batch: Option<BatchSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    max_retries: Option<u32>,
    base_delay_secs: Option<f64>,
    max_delay_secs: Option<f64>,
    /// Two-element range, e.g. [0.0, 0.5]
    jitter_secs: Option<[f64; 2]>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BatchSection {
    max_workers: Option<usize>,
    operation_timeout_secs: Option<f64>,
}

/// Runtime survey configuration, built once at startup
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurveyConfig {
    pub retry: RetryPolicy,
    pub batch: BatchOptions,
    /// Highest-priority layer that supplied a value (for logging)
    pub source: ConfigSource,
}

/// Where the configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigSource {
    /// Using built-in defaults
    #[default]
    Default,
    /// At least one value came from an environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("netsurvey").join("config.toml"))
}

fn parse_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Load the default config file, if present. Problems are logged, not fatal.
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match parse_config_file(&path) {
        Ok(config) => {
            tracing::debug!("Loaded config from {:?}", path);
            Some(config)
        }
        Err(e) => {
            tracing::warn!("{:#}", e);
            None
        }
    }
}

/// Load survey configuration with priority:
/// 1. Environment variables (NETSURVEY_MAX_WORKERS, NETSURVEY_OPERATION_TIMEOUT_SECS,
///    NETSURVEY_MAX_RETRIES)
/// 2. Config file (~/.config/netsurvey/config.toml)
/// 3. Default values
pub fn load_survey_config() -> SurveyConfig {
    resolve(load_config_file(), |key| std::env::var(key).ok())
}

/// Like [`load_survey_config`] but with an explicit config file, which must
/// exist and parse.
pub fn load_survey_config_from(path: &Path) -> Result<SurveyConfig> {
    let file = parse_config_file(path)?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(resolve(Some(file), |key| std::env::var(key).ok()))
}

fn resolve(file: Option<ConfigFile>, env: impl Fn(&str) -> Option<String>) -> SurveyConfig {
    let mut config = SurveyConfig::default();

    if let Some(file) = file {
        if apply_file(&mut config, file) {
            config.source = ConfigSource::ConfigFile;
        }
    }

    let mut from_env = false;
    if let Some(workers) = env_value::<usize>(&env, ENV_MAX_WORKERS).filter(|w| *w > 0) {
        config.batch.max_workers = workers;
        from_env = true;
    }
    if let Some(timeout) = env_value::<f64>(&env, ENV_OPERATION_TIMEOUT).and_then(positive_secs) {
        config.batch.operation_timeout = timeout;
        from_env = true;
    }
    if let Some(retries) = env_value::<u32>(&env, ENV_MAX_RETRIES) {
        config.retry.max_retries = retries;
        from_env = true;
    }
    if from_env {
        config.source = ConfigSource::Environment;
    }

    tracing::debug!(
        "Survey config from {}: {} workers, {:?} timeout, {} retries",
        config.source,
        config.batch.max_workers,
        config.batch.operation_timeout,
        config.retry.max_retries
    );
    config
}

/// Returns true when the file set at least one value.
fn apply_file(config: &mut SurveyConfig, file: ConfigFile) -> bool {
    let mut applied = false;

    if let Some(retry) = file.retry {
        if let Some(max_retries) = retry.max_retries {
            config.retry.max_retries = max_retries;
            applied = true;
        }
        if let Some(base) = retry.base_delay_secs.and_then(non_negative_secs) {
            config.retry.base_delay = base;
            applied = true;
        }
        if let Some(max) = retry.max_delay_secs.and_then(non_negative_secs) {
            config.retry.max_delay = max;
            applied = true;
        }
        if let Some([lo, hi]) = retry.jitter_secs {
            if let (Some(lo), Some(hi)) = (non_negative_secs(lo), non_negative_secs(hi)) {
                config.retry.jitter = (lo, hi);
                applied = true;
            }
        }
    }

    if let Some(batch) = file.batch {
        if let Some(workers) = batch.max_workers.filter(|w| *w > 0) {
            config.batch.max_workers = workers;
            applied = true;
        }
        if let Some(timeout) = batch.operation_timeout_secs.and_then(positive_secs) {
            config.batch.operation_timeout = timeout;
            applied = true;
        }
    }

    applied
}

fn env_value<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => {
            tracing::info!("Using {} from environment variable: {}", key, raw.trim());
            Some(value)
        }
        Err(_) => {
            tracing::warn!("Ignoring invalid {} value '{}'", key, raw);
            None
        }
    }
}

fn non_negative_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn positive_secs(secs: f64) -> Option<Duration> {
    non_negative_secs(secs).filter(|d| !d.is_zero())
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/netsurvey/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# netsurvey configuration
# Place this file at: ~/.config/netsurvey/config.toml

[retry]
# Extra attempts after a rate-limited query (env: NETSURVEY_MAX_RETRIES)
# max_retries = 3
# base_delay_secs = 1.0
# max_delay_secs = 30.0
# jitter_secs = [0.0, 0.5]

[batch]
# Devices queried at the same time (env: NETSURVEY_MAX_WORKERS)
# max_workers = 10
# Budget per device, retries included (env: NETSURVEY_OPERATION_TIMEOUT_SECS)
# operation_timeout_secs = 60
"#
    .to_string()
}

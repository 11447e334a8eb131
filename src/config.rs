use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};

use crate::number::NumberTolerance;

pub const ENV_INDEX_TTL_MS: &str = "TOKENLINK_INDEX_TTL_MS";
pub const ENV_LIBRARY_TTL_MS: &str = "TOKENLINK_LIBRARY_TTL_MS";
pub const ENV_SCAN_BATCH_SIZE: &str = "TOKENLINK_SCAN_BATCH_SIZE";
pub const ENV_LOG_LEVEL: &str = "TOKENLINK_LOG_LEVEL";

pub const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "fatal"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index_ttl_ms: u64,
    pub library_ttl_ms: u64,
    pub scan_batch_size: usize,
    pub number_abs_tolerance: f64,
    pub number_rel_tolerance: f64,
    pub close_value_max_diff: f64,
    pub semantic_prefixes: Vec<String>,
    pub semantic_collection_markers: Vec<String>,
    pub component_markers: Vec<String>,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_ttl_ms: 5_000,
            library_ttl_ms: 30_000,
            scan_batch_size: 50,
            number_abs_tolerance: 1.0,
            number_rel_tolerance: 0.05,
            close_value_max_diff: 1.0,
            semantic_prefixes: strings(&["system", "semantic", "theme"]),
            semantic_collection_markers: strings(&["semantic", "system", "theme", "alias"]),
            component_markers: strings(&["component", "components"]),
            log_level: "warn".to_string(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TOKENLINK_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_INDEX_TTL_MS) {
            self.index_ttl_ms = parse_env(ENV_INDEX_TTL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LIBRARY_TTL_MS) {
            self.library_ttl_ms = parse_env(ENV_LIBRARY_TTL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SCAN_BATCH_SIZE) {
            self.scan_batch_size = parse_env(ENV_SCAN_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            self.log_level = raw.trim().to_lowercase();
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_batch_size == 0 {
            return Err(anyhow!("scan_batch_size must be at least 1"));
        }
        if self.number_abs_tolerance < 0.0 || self.number_rel_tolerance < 0.0 {
            return Err(anyhow!("number tolerances must not be negative"));
        }
        if self.close_value_max_diff < 0.0 {
            return Err(anyhow!("close_value_max_diff must not be negative"));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(anyhow!("unsupported log level: {}", self.log_level));
        }
        Ok(())
    }

    pub fn index_ttl(&self) -> Duration {
        Duration::from_millis(self.index_ttl_ms)
    }

    pub fn library_ttl(&self) -> Duration {
        Duration::from_millis(self.library_ttl_ms)
    }

    pub fn number_tolerance(&self) -> NumberTolerance {
        NumberTolerance::new(self.number_abs_tolerance, self.number_rel_tolerance)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| anyhow!("invalid value for {key}: {err}"))
}

/// Numeric rank of a log level, `None` for unknown levels.
pub fn level_rank(level: &str) -> Option<usize> {
    LOG_LEVELS.iter().position(|candidate| *candidate == level)
}

//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;
use std::time::Duration;

const MAX_CAPACITY: usize = 1_000_000;
const MAX_STRIPES: usize = 4096;
const MAX_WORKERS: usize = 256;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration: defaults, then `PROCTRACK_*` environment
    /// overrides, then whatever the file at `path` sets
    pub fn load(path: &Path) -> Result<Config> {
        Self::load_layered(path, |name| std::env::var(name).ok())
    }

    /// Load configuration from file, ignoring the environment
    pub fn load_from_file(path: &Path) -> Result<Config> {
        Self::load_layered(path, |_| None)
    }

    /// Layer the file at `path` over defaults with overrides read through `lookup`
    pub fn load_layered<F>(path: &Path, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        Self::apply_env(&mut config, lookup)?;

        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            config = Self::overlay(config, &content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults and environment",
                path.display()
            );
        }

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it
    pub fn parse(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }

    /// Apply only the settings present in TOML `content` on top of `base`
    pub fn overlay(base: Config, content: &str) -> Result<Config> {
        let mut merged = toml::Value::try_from(&base)?;
        let file: toml::Table = toml::from_str(content)?;
        merge_values(&mut merged, toml::Value::Table(file));
        Ok(merged.try_into()?)
    }

    /// Apply `PROCTRACK_*` overrides read through `lookup`
    pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(capacity) = lookup("PROCTRACK_CAPACITY") {
            config.table.capacity = capacity
                .parse::<usize>()
                .with_context(|| format!("Invalid PROCTRACK_CAPACITY: {}", capacity))?;
        }

        if let Some(stripes) = lookup("PROCTRACK_STRIPES") {
            config.table.stripes = stripes
                .parse::<usize>()
                .with_context(|| format!("Invalid PROCTRACK_STRIPES: {}", stripes))?;
        }

        if let Some(workers) = lookup("PROCTRACK_WORKERS") {
            config.tracker.workers = workers
                .parse::<usize>()
                .with_context(|| format!("Invalid PROCTRACK_WORKERS: {}", workers))?;
        }

        if let Some(interval) = lookup("PROCTRACK_REPORT_INTERVAL") {
            config.monitoring.report_interval = humantime::parse_duration(&interval)
                .with_context(|| format!("Invalid PROCTRACK_REPORT_INTERVAL: {}", interval))?;
        }

        if let Some(log_level) = lookup("PROCTRACK_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_table_config()
            .with_context(|| "Table configuration validation failed")?;

        self.validate_tracker_config()
            .with_context(|| "Tracker configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_table_config(&self) -> Result<()> {
        if self.table.capacity == 0 {
            bail!("capacity must be greater than 0");
        }

        if self.table.capacity > MAX_CAPACITY {
            bail!("capacity cannot exceed {}", MAX_CAPACITY);
        }

        if self.table.stripes == 0 || self.table.stripes > MAX_STRIPES {
            bail!("stripes must be between 1 and {}", MAX_STRIPES);
        }

        Ok(())
    }

    fn validate_tracker_config(&self) -> Result<()> {
        if self.tracker.workers > MAX_WORKERS {
            bail!("workers cannot exceed {}", MAX_WORKERS);
        }

        if self.tracker.channel_capacity == 0 {
            bail!("channel_capacity must be greater than 0");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        if self.monitoring.report_interval < Duration::from_secs(1) {
            bail!("monitoring.report_interval must be at least 1s");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        capacity: Option<usize>,
        workers: Option<usize>,
        log_level: Option<&str>,
    ) {
        if let Some(capacity) = capacity {
            self.table.capacity = capacity;
            tracing::info!("CLI override: capacity set to {}", capacity);
        }

        if let Some(workers) = workers {
            self.tracker.workers = workers;
            tracing::info!("CLI override: workers set to {}", workers);
        }

        if let Some(log_level) = log_level {
            self.monitoring.log_level = log_level.to_string();
            tracing::info!("CLI override: log level set to {}", log_level);
        }
    }
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

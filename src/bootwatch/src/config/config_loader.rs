use anyhow::{Context, Result};
use config::{Config as RConfig, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{
    CONFIG_FILE, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_MAX_MS,
    DEFAULT_FALLBACK_BUFFER_CAPACITY, DEFAULT_HEALTH_CHECK_INTERVAL_MS,
    DEFAULT_HEALTH_CHECK_MAX_MISSES, DEFAULT_LOG_DIR, DEFAULT_LOG_ROTATION_SIZE_BYTES,
    DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_READINESS_POLL_INTERVAL_MS,
    DEFAULT_READINESS_TIMEOUT_MS, DEFAULT_TERMINATION_GRACE_MS, ENV_PREFIX, PERFORMANCE_LOG_FILE,
};
use crate::error::ConfigurationError;
use crate::instrumentation::{Category, Threshold, ThresholdRegistry};
use crate::logger::LoggerConfig;
use crate::supervisor::{BackoffPolicy, SupervisorConfig};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CategoryThreshold {
    pub category: String,
    pub warn_at_ms: u64,
    pub critical_at_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct OperationThreshold {
    /// Exact span name, or a prefix ending in `_`.
    pub operation: String,
    pub warn_at_ms: u64,
    pub critical_at_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub readiness_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub max_restart_attempts: u32,
    pub backoff_base_ms: u64,
    pub log_rotation_size_bytes: u64,

    pub backoff_factor: f64,
    pub backoff_max_ms: u64,
    pub health_check_max_misses: u32,
    pub readiness_poll_interval_ms: u64,
    pub termination_grace_ms: u64,
    pub probe_timeout_ms: u64,
    pub fallback_buffer_capacity: usize,
    pub log_dir: PathBuf,

    #[serde(default)]
    pub thresholds: Vec<CategoryThreshold>,
    #[serde(default)]
    pub operation_thresholds: Vec<OperationThreshold>,

    #[serde(default)]
    pub config_sources: Vec<String>,
}

impl Config {
    /// Rejects values that would make the supervisor or logger misbehave.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let non_zero = [
            ("readiness_timeout_ms", self.readiness_timeout_ms),
            ("health_check_interval_ms", self.health_check_interval_ms),
            ("backoff_base_ms", self.backoff_base_ms),
            ("log_rotation_size_bytes", self.log_rotation_size_bytes),
            ("readiness_poll_interval_ms", self.readiness_poll_interval_ms),
            ("termination_grace_ms", self.termination_grace_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("health_check_max_misses", self.health_check_max_misses as u64),
            ("fallback_buffer_capacity", self.fallback_buffer_capacity as u64),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigurationError::Zero { field });
        }

        if !(self.backoff_factor >= 1.0 && self.backoff_factor.is_finite()) {
            return Err(ConfigurationError::BackoffFactor(self.backoff_factor));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigurationError::BackoffCap {
                base_ms: self.backoff_base_ms,
                max_ms: self.backoff_max_ms,
            });
        }

        for threshold in &self.thresholds {
            threshold
                .category
                .parse::<Category>()
                .map_err(|_| ConfigurationError::UnknownCategory(threshold.category.clone()))?;
            check_threshold(&threshold.category, threshold.warn_at_ms, threshold.critical_at_ms)?;
        }
        for threshold in &self.operation_thresholds {
            check_threshold(&threshold.operation, threshold.warn_at_ms, threshold.critical_at_ms)?;
        }
        Ok(())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            readiness_timeout: Duration::from_millis(self.readiness_timeout_ms),
            readiness_poll_interval: Duration::from_millis(self.readiness_poll_interval_ms),
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            health_check_max_misses: self.health_check_max_misses,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            max_restart_attempts: self.max_restart_attempts,
            backoff: BackoffPolicy {
                first: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
                factor: self.backoff_factor,
            },
            termination_grace: Duration::from_millis(self.termination_grace_ms),
        }
    }

    pub fn threshold_registry(&self) -> Result<Arc<ThresholdRegistry>, ConfigurationError> {
        let mut registry = ThresholdRegistry::default();
        for threshold in &self.thresholds {
            let category = threshold
                .category
                .parse::<Category>()
                .map_err(|_| ConfigurationError::UnknownCategory(threshold.category.clone()))?;
            registry = registry.with_category(Threshold::from_millis(
                category,
                threshold.warn_at_ms,
                threshold.critical_at_ms,
            ));
        }
        for threshold in &self.operation_thresholds {
            registry = registry.with_operation(
                threshold.operation.clone(),
                Threshold::from_millis(
                    Category::Generic,
                    threshold.warn_at_ms,
                    threshold.critical_at_ms,
                ),
            );
        }
        Ok(Arc::new(registry))
    }

    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            log_dir: self.log_dir.clone(),
            file_name: PERFORMANCE_LOG_FILE.to_string(),
            rotation_size_bytes: self.log_rotation_size_bytes,
            fallback_capacity: self.fallback_buffer_capacity,
            mirror_to_tracing: true,
        }
    }
}

fn check_threshold(key: &str, warn_ms: u64, critical_ms: u64) -> Result<(), ConfigurationError> {
    if warn_ms == 0 {
        return Err(ConfigurationError::ThresholdZero(key.to_string()));
    }
    if critical_ms < warn_ms {
        return Err(ConfigurationError::ThresholdOrder {
            key: key.to_string(),
            warn_ms,
            critical_ms,
        });
    }
    Ok(())
}

pub struct ConfigLoader;

impl ConfigLoader {
    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = RConfig::builder()
            .set_default("readiness_timeout_ms", DEFAULT_READINESS_TIMEOUT_MS)?
            .set_default("health_check_interval_ms", DEFAULT_HEALTH_CHECK_INTERVAL_MS)?
            .set_default("max_restart_attempts", DEFAULT_MAX_RESTART_ATTEMPTS as u64)?
            .set_default("backoff_base_ms", DEFAULT_BACKOFF_BASE_MS)?
            .set_default("log_rotation_size_bytes", DEFAULT_LOG_ROTATION_SIZE_BYTES)?
            .set_default("backoff_factor", DEFAULT_BACKOFF_FACTOR)?
            .set_default("backoff_max_ms", DEFAULT_BACKOFF_MAX_MS)?
            .set_default("health_check_max_misses", DEFAULT_HEALTH_CHECK_MAX_MISSES as u64)?
            .set_default("readiness_poll_interval_ms", DEFAULT_READINESS_POLL_INTERVAL_MS)?
            .set_default("termination_grace_ms", DEFAULT_TERMINATION_GRACE_MS)?
            .set_default("probe_timeout_ms", DEFAULT_PROBE_TIMEOUT_MS)?
            .set_default("fallback_buffer_capacity", DEFAULT_FALLBACK_BUFFER_CAPACITY as u64)?
            .set_default("log_dir", DEFAULT_LOG_DIR)?
            .set_default::<&str, Vec<String>>("thresholds", vec![])?
            .set_default::<&str, Vec<String>>("operation_thresholds", vec![])?;
        Ok(builder)
    }

    /// Defaults only; ignores files and environment.
    pub fn load_default_config() -> Result<Config> {
        let config: Config = Self::builder()?
            .set_override::<&str, Vec<&str>>("config_sources", vec![])?
            .build()?
            .try_deserialize()
            .context("failed to build default config")?;
        Ok(config)
    }

    /// Defaults, then `path` (or `bootwatch.toml` in the working directory if
    /// present), then `BOOTWATCH_*` environment variables. The result is
    /// validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(CONFIG_FILE), false),
        };

        let mut sources = vec![];
        if file.exists() {
            sources.push(file.display().to_string());
        }

        let mut config: Config = Self::builder()?
            .add_source(File::from(file.as_path()).required(required))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("failed to read config from {}", file.display()))?
            .try_deserialize()
            .context("failed to parse config file")?;

        config.config_sources = sources;
        config.validate()?;
        Ok(config)
    }
}

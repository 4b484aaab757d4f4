use std::path::PathBuf;

use crate::config::Config;
use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_MAX_MS,
    DEFAULT_FALLBACK_BUFFER_CAPACITY, DEFAULT_HEALTH_CHECK_INTERVAL_MS,
    DEFAULT_HEALTH_CHECK_MAX_MISSES, DEFAULT_LOG_DIR, DEFAULT_LOG_ROTATION_SIZE_BYTES,
    DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_READINESS_POLL_INTERVAL_MS,
    DEFAULT_READINESS_TIMEOUT_MS, DEFAULT_TERMINATION_GRACE_MS,
};

impl Default for Config {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: DEFAULT_READINESS_TIMEOUT_MS,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            log_rotation_size_bytes: DEFAULT_LOG_ROTATION_SIZE_BYTES,

            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            health_check_max_misses: DEFAULT_HEALTH_CHECK_MAX_MISSES,
            readiness_poll_interval_ms: DEFAULT_READINESS_POLL_INTERVAL_MS,
            termination_grace_ms: DEFAULT_TERMINATION_GRACE_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            fallback_buffer_capacity: DEFAULT_FALLBACK_BUFFER_CAPACITY,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),

            thresholds: vec![],
            operation_thresholds: vec![],
            config_sources: vec![],
        }
    }
}

pub const ENV_PREFIX: &str = "BOOTWATCH";
pub const CONFIG_FILE: &str = "bootwatch.toml";

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const PERFORMANCE_LOG_FILE: &str = "performance.jsonl";
pub const DIAGNOSTICS_LOG_FILE: &str = "bootwatch.log";
pub const WORKER_STDERR_FILE: &str = "worker.err";

pub const DEFAULT_READINESS_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_CHECK_MAX_MISSES: u32 = 3;
pub const DEFAULT_READINESS_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_TERMINATION_GRACE_MS: u64 = 5_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;

pub const DEFAULT_LOG_ROTATION_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_FALLBACK_BUFFER_CAPACITY: usize = 1024;

pub const DEFAULT_GENERIC_WARN_MS: u64 = 5_000;
pub const DEFAULT_GENERIC_CRITICAL_MS: u64 = 10_000;

/// Readiness handshake line a worker prints once it can serve requests.
pub const READY_STATUS_FIELD: &str = "status";
pub const READY_STATUS_SUCCESS: &str = "success";

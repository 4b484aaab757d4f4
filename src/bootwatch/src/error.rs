//! Error types for the startup diagnostics core.
//!
//! None of these ever unwind into host code: supervisor and instrumentation
//! failures are recovered locally and surfaced as report data. The `as_label`
//! helpers give stable snake_case names for structured log fields.

use std::time::Duration;
use thiserror::Error;

use crate::supervisor::ProcessState;

/// Invalid configuration, detected before any stage runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("backoff_factor must be >= 1.0, got {0}")]
    BackoffFactor(f64),

    #[error("backoff_max_ms ({max_ms}) must not be smaller than backoff_base_ms ({base_ms})")]
    BackoffCap { base_ms: u64, max_ms: u64 },

    #[error("threshold for {key}: critical_at_ms ({critical_ms}) is below warn_at_ms ({warn_ms})")]
    ThresholdOrder {
        key: String,
        warn_ms: u64,
        critical_ms: u64,
    },

    #[error("threshold for {0}: warn_at_ms must be greater than zero")]
    ThresholdZero(String),

    #[error("unknown threshold category {0}")]
    UnknownCategory(String),

    #[error("stage {stage} depends on {dependency}, which is not declared before it")]
    UnknownDependency { stage: String, dependency: String },

    #[error("stage {0} is declared twice")]
    DuplicateStage(String),
}

/// Failures of the process supervisor.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupervisorError {
    #[error("failed to spawn worker {program}: {reason}")]
    SpawnFailure { program: String, reason: String },

    #[error("worker not ready after {timeout:?}")]
    ReadinessTimeout { timeout: Duration },

    #[error("worker reported not ready: {0}")]
    NotReady(String),

    #[error("worker exited before becoming ready ({0})")]
    WorkerExited(String),

    #[error("worker missed {misses} consecutive health checks")]
    HealthCheckMiss { misses: u32 },

    #[error("cannot {operation} while worker is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: ProcessState,
    },

    #[error("worker restart cooling down for another {remaining:?}")]
    CoolingDown { remaining: Duration },

    #[error("worker handle was terminated")]
    Terminated,

    #[error("worker failed permanently after {attempts} restart attempts")]
    RestartsExhausted { attempts: u32 },
}

impl SupervisorError {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::SpawnFailure { .. } => "spawn_failure",
            SupervisorError::ReadinessTimeout { .. } => "readiness_timeout",
            SupervisorError::NotReady(_) => "not_ready",
            SupervisorError::WorkerExited(_) => "worker_exited",
            SupervisorError::HealthCheckMiss { .. } => "health_check_miss",
            SupervisorError::InvalidTransition { .. } => "invalid_transition",
            SupervisorError::CoolingDown { .. } => "cooling_down",
            SupervisorError::Terminated => "terminated",
            SupervisorError::RestartsExhausted { .. } => "restarts_exhausted",
        }
    }

    /// Whether the restart policy should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupervisorError::SpawnFailure { .. }
                | SupervisorError::ReadinessTimeout { .. }
                | SupervisorError::NotReady(_)
                | SupervisorError::WorkerExited(_)
                | SupervisorError::HealthCheckMiss { .. }
        )
    }
}

/// The performance log sink could not be written.
///
/// Never propagated past the logger; it only switches the logger into its
/// in-memory fallback.
#[derive(Error, Debug)]
#[error("performance log sink write failed: {0}")]
pub struct SinkWriteFailure(#[from] pub std::io::Error);

impl SinkWriteFailure {
    pub fn as_label(&self) -> &'static str {
        "sink_write_failure"
    }
}

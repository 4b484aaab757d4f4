#![allow(dead_code)]

use bootwatch::instrumentation::ThresholdRegistry;
use bootwatch::logger::{LogEntry, LoggerConfig, PerfLogger};
use bootwatch::supervisor::{BackoffPolicy, SupervisorConfig, WorkerCommand};
use std::sync::Arc;
use std::time::Duration;

/// Worker that prints the readiness handshake after `delay_ms`.
pub fn ready_after(delay_ms: u64) -> WorkerCommand {
    let seconds = delay_ms as f64 / 1000.0;
    WorkerCommand::new("sh").args([
        "-c".to_string(),
        format!(r#"sleep {seconds}; echo '{{"status": "success"}}'; sleep 30"#),
    ])
}

pub fn sh(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").args(["-c", script])
}

pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        readiness_timeout: Duration::from_millis(300),
        readiness_poll_interval: Duration::from_millis(10),
        health_check_interval: Duration::from_millis(100),
        health_check_max_misses: 3,
        probe_timeout: Duration::from_millis(100),
        max_restart_attempts: 0,
        backoff: BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_millis(400),
            factor: 2.0,
        },
        termination_grace: Duration::from_millis(500),
    }
}

pub fn memory_logger(registry: ThresholdRegistry) -> Arc<PerfLogger> {
    let config = LoggerConfig {
        mirror_to_tracing: false,
        ..LoggerConfig::default()
    };
    PerfLogger::in_memory(&config, Arc::new(registry))
}

pub fn entries_with_message(logger: &PerfLogger, message: &str) -> Vec<LogEntry> {
    logger
        .buffered_entries()
        .into_iter()
        .filter(|entry| entry.message == message)
        .collect()
}

pub fn span_entries(logger: &PerfLogger, name: &str) -> Vec<LogEntry> {
    logger
        .buffered_entries()
        .into_iter()
        .filter(|entry| entry.span_name() == Some(name))
        .collect()
}

#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

//! Graceful-then-forced worker termination

use std::time::Duration;
use tokio::process::Child;

/// Termination result
#[derive(Debug, PartialEq, Clone)]
pub enum TerminationResult {
    /// There was no worker process to stop.
    NotRunning,
    /// The worker had already exited; it was only reaped.
    AlreadyExited,
    /// The worker exited within the grace period after SIGTERM.
    Graceful,
    /// The worker ignored SIGTERM and was killed.
    Killed,
    Error(String),
}

impl TerminationResult {
    pub fn as_label(&self) -> &'static str {
        match self {
            TerminationResult::NotRunning => "not_running",
            TerminationResult::AlreadyExited => "already_exited",
            TerminationResult::Graceful => "graceful",
            TerminationResult::Killed => "killed",
            TerminationResult::Error(_) => "error",
        }
    }
}

/// Asks the worker to stop, waits up to `grace`, then kills it.
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> TerminationResult {
    if let Ok(Some(_)) = child.try_wait() {
        return TerminationResult::AlreadyExited;
    }

    let result = match request_stop(child) {
        Err(e) => {
            tracing::warn!("Failed to send SIGTERM to worker: {}", e);
            force_kill(child).await
        }
        Ok(()) => match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => TerminationResult::Graceful,
            Ok(Err(e)) => TerminationResult::Error(e.to_string()),
            Err(_) => {
                tracing::warn!("Worker still running after {:?}, sending SIGKILL", grace);
                force_kill(child).await
            }
        },
    };

    log_result(&result);
    result
}

/// Kills the worker without a grace period and reaps it.
pub async fn force_kill(child: &mut Child) -> TerminationResult {
    if let Ok(Some(_)) = child.try_wait() {
        return TerminationResult::AlreadyExited;
    }
    match child.kill().await {
        Ok(()) => TerminationResult::Killed,
        Err(e) => TerminationResult::Error(e.to_string()),
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

fn log_result(result: &TerminationResult) {
    match result {
        TerminationResult::NotRunning => tracing::info!("Worker was not running"),
        TerminationResult::AlreadyExited => tracing::info!("Worker had already exited"),
        TerminationResult::Graceful => tracing::info!("Worker terminated gracefully"),
        TerminationResult::Killed => tracing::warn!("Worker was killed"),
        TerminationResult::Error(e) => tracing::warn!("Worker termination error: {}", e),
    }
}

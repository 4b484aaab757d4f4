#![cfg(unix)]

mod common;

use bootwatch::instrumentation::{Category, Outcome, Threshold, ThresholdRegistry};
use bootwatch::logger::Severity;
use bootwatch::supervisor::{
    HealthProbe, ProcessState, ProcessSupervisor, ReadinessProbe, SupervisorConfig,
    TerminationResult, READINESS_SPAN,
};
use bootwatch::SupervisorError;
use common::*;
use rstest::*;
use std::time::{Duration, Instant};

#[fixture]
fn subprocess_registry() -> ThresholdRegistry {
    // Scaled-down worker budget: 300ms warn, 600ms critical.
    ThresholdRegistry::default().with_category(Threshold::from_millis(Category::Subprocess, 300, 600))
}

#[tokio::test]
async fn readiness_timeout_fails_kills_and_schedules_restart() {
    // Default budgets: the 300ms timeout is far below the worker's warn budget.
    let logger = memory_logger(ThresholdRegistry::default());
    let config = SupervisorConfig {
        max_restart_attempts: 1,
        ..fast_config()
    };
    let supervisor = ProcessSupervisor::new(ready_after(2_000), config, logger.clone());
    let mut states = supervisor.subscribe();

    let launch = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.launch().await })
    };

    states
        .wait_for(|state| *state == ProcessState::Starting)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let first_pid = supervisor.handle().pid;

    let started = Instant::now();
    let result = launch.await.unwrap();
    assert_eq!(result, Err(SupervisorError::RestartsExhausted { attempts: 1 }));
    assert_eq!(supervisor.state(), ProcessState::Failed);
    assert!(started.elapsed() < Duration::from_secs(2));

    if let Some(pid) = first_pid {
        assert!(!pid_alive(pid));
    }

    let restarts = entries_with_message(&logger, "Worker restart scheduled");
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].fields.get("delay_ms").unwrap().to_string(), "100");
    assert_eq!(restarts[0].fields.get("reason").unwrap().to_string(), "readiness_timeout");

    let spans = span_entries(&logger, READINESS_SPAN);
    assert_eq!(spans.len(), 2);
    for entry in &spans {
        let span = entry.span.as_ref().unwrap();
        assert_eq!(span.outcome, Outcome::TimedOut);
        assert!(span.duration_ms >= 300.0);
        assert_eq!(entry.severity, Severity::Bottleneck);
        assert!(entry.fields.get("critical_at_ms").is_some());
    }

    assert_eq!(entries_with_message(&logger, "Worker failed permanently").len(), 1);
}

#[rstest]
#[tokio::test]
async fn worker_ready_within_timeout_reaches_ready(subprocess_registry: ThresholdRegistry) {
    let logger = memory_logger(subprocess_registry);
    let supervisor = ProcessSupervisor::new(ready_after(50), fast_config(), logger.clone());

    let pid = supervisor.launch().await.unwrap();
    assert!(pid_alive(pid));
    assert_eq!(supervisor.state(), ProcessState::Ready);

    let spans = span_entries(&logger, READINESS_SPAN);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].severity, Severity::Info);

    assert_eq!(supervisor.terminate().await, TerminationResult::Graceful);
    assert!(!pid_alive(pid));
}

#[tokio::test]
async fn three_missed_health_checks_fail_the_worker() {
    let logger = memory_logger(ThresholdRegistry::default());
    let supervisor = ProcessSupervisor::with_probes(
        sh(r#"echo '{"status":"success"}'; sleep 30"#),
        fast_config(),
        logger.clone(),
        ReadinessProbe::Handshake,
        HealthProbe::Ping {
            request: "ping".to_string(),
            expect: "pong".to_string(),
        },
    );
    let mut states = supervisor.subscribe();

    supervisor.launch().await.unwrap();
    let ready_at = Instant::now();

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ProcessState::Failed),
    )
    .await
    .unwrap()
    .unwrap();

    // Three intervals plus three probe timeouts.
    assert!(ready_at.elapsed() >= Duration::from_millis(300));
    assert_eq!(entries_with_message(&logger, "Worker health check missed").len(), 2);
    assert_eq!(entries_with_message(&logger, "Worker READY -> DEGRADED").len(), 1);
    assert_eq!(entries_with_message(&logger, "Worker DEGRADED -> FAILED").len(), 1);

    supervisor.terminate().await;
}

#[tokio::test]
async fn crashed_worker_is_restarted_by_the_monitor() {
    let logger = memory_logger(ThresholdRegistry::default());
    let config = SupervisorConfig {
        max_restart_attempts: 1,
        health_check_max_misses: 1,
        ..fast_config()
    };
    // Ready, then exits shortly after.
    let supervisor = ProcessSupervisor::new(
        sh(r#"echo '{"status":"success"}'; sleep 0.15"#),
        config,
        logger.clone(),
    );
    let mut states = supervisor.subscribe();

    supervisor.launch().await.unwrap();
    let first_handle = supervisor.handle().id;

    let restarted = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            states.changed().await.unwrap();
            let handle = supervisor.handle();
            if handle.id != first_handle && handle.state == ProcessState::Ready {
                return handle;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(restarted.restart_count, 1);

    supervisor.terminate().await;
}

#[tokio::test]
async fn terminate_twice_is_a_no_op() {
    let logger = memory_logger(ThresholdRegistry::default());
    let supervisor = ProcessSupervisor::new(ready_after(0), fast_config(), logger.clone());
    let pid = supervisor.launch().await.unwrap();

    assert_eq!(supervisor.terminate().await, TerminationResult::Graceful);
    assert_eq!(supervisor.terminate().await, TerminationResult::NotRunning);
    assert_eq!(supervisor.state(), ProcessState::Terminated);
    assert!(!pid_alive(pid));

    let terminations = entries_with_message(&logger, "Worker READY -> TERMINATED");
    assert_eq!(terminations.len(), 1);
}

#[tokio::test]
async fn worker_ignoring_sigterm_is_killed_after_grace() {
    let logger = memory_logger(ThresholdRegistry::default());
    let config = SupervisorConfig {
        termination_grace: Duration::from_millis(200),
        ..fast_config()
    };
    let supervisor = ProcessSupervisor::new(
        sh(r#"trap '' TERM; echo '{"status":"success"}'; while true; do sleep 0.05; done"#),
        config,
        logger,
    );
    supervisor.launch().await.unwrap();

    assert_eq!(supervisor.terminate().await, TerminationResult::Killed);
}

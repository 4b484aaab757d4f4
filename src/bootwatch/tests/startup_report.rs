mod common;

use bootwatch::instrumentation::{Category, Metadata, Threshold, ThresholdRegistry};
use bootwatch::logger::{read_log, LoggerConfig, PerfLogger, Severity};
use bootwatch::orchestrator::{
    Stage, StageOutcome, StartupOrchestrator, StartupPlan, COLD_START_SPAN, SETTINGS_LOAD,
    UI_PANEL_LOAD,
};
use common::*;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn sleeping_stage(name: &str, category: Category, millis: u64) -> Stage {
    Stage::new(name, category, move |_| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(Metadata::new())
    })
}

#[tokio::test]
async fn settings_load_of_600ms_is_ok() {
    let logger = memory_logger(ThresholdRegistry::default());
    let plan = StartupPlan::new().stage(sleeping_stage(SETTINGS_LOAD, Category::Settings, 600));

    let report = StartupOrchestrator::new(logger.clone(), plan)
        .unwrap()
        .run()
        .await;

    let stage = report.stage(SETTINGS_LOAD).unwrap();
    assert_eq!(stage.severity, Some(Severity::Info));
    assert!(stage.duration.unwrap() >= Duration::from_millis(600));

    let entries = span_entries(&logger, SETTINGS_LOAD);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].severity, Severity::Info);
}

#[rstest]
#[case(50, Severity::Info)]
#[case(150, Severity::Warn)]
#[case(250, Severity::Bottleneck)]
#[tokio::test]
async fn ui_panel_is_classified_against_its_budget(#[case] millis: u64, #[case] expected: Severity) {
    // Scaled-down UI panel budget: 100ms warn, 200ms critical.
    let registry = ThresholdRegistry::default()
        .with_category(Threshold::from_millis(Category::Webview, 100, 200));
    let logger = memory_logger(registry);
    let plan = StartupPlan::new().stage(sleeping_stage(UI_PANEL_LOAD, Category::Webview, millis));

    let report = StartupOrchestrator::new(logger.clone(), plan)
        .unwrap()
        .run()
        .await;

    assert_eq!(report.stage(UI_PANEL_LOAD).unwrap().severity, Some(expected));
    let entry = &span_entries(&logger, UI_PANEL_LOAD)[0];
    assert_eq!(entry.severity, expected);
    if expected == Severity::Warn {
        assert!(entry.message.contains("Performance bottleneck detected"));
        assert!(entry.fields.get("overrun_pct").is_some());
    }
}

#[cfg(unix)]
#[tokio::test]
async fn failed_worker_puts_host_in_degraded_mode() {
    use bootwatch::orchestrator::{standard_plan, WORKER_SPAWN};
    use bootwatch::supervisor::{ProcessState, ProcessSupervisor};
    use bootwatch::utils::workdir::LogDir;

    let temp_dir = TempDir::new().unwrap();
    let logger = memory_logger(ThresholdRegistry::default());
    let supervisor = ProcessSupervisor::new(sh("exit 1"), fast_config(), logger.clone());

    let plan = standard_plan(
        LogDir::new(temp_dir.path()),
        None,
        supervisor.clone(),
        None,
    );
    let report = StartupOrchestrator::new(logger.clone(), plan)
        .unwrap()
        .with_supervisor(supervisor.clone())
        .run()
        .await;

    assert!(report.degraded_mode);
    assert_eq!(report.worker_state, Some(ProcessState::Failed));
    assert!(matches!(
        report.stage(WORKER_SPAWN).unwrap().outcome,
        StageOutcome::Failed { .. }
    ));
    assert_eq!(report.stage(SETTINGS_LOAD).unwrap().outcome, StageOutcome::Succeeded);
    assert_eq!(report.stage(UI_PANEL_LOAD).unwrap().outcome, StageOutcome::Succeeded);

    supervisor.terminate().await;
}

#[cfg(unix)]
#[tokio::test]
async fn standard_startup_with_ready_worker() {
    use bootwatch::orchestrator::{standard_plan, ENVIRONMENT_SETUP, WORKER_SPAWN};
    use bootwatch::supervisor::{ProcessState, ProcessSupervisor, READINESS_SPAN};
    use bootwatch::utils::workdir::LogDir;

    let temp_dir = TempDir::new().unwrap();
    let log_dir = LogDir::new(temp_dir.path().join("logs"));
    let config = LoggerConfig {
        log_dir: log_dir.path.clone(),
        mirror_to_tracing: false,
        ..LoggerConfig::default()
    };
    let logger = PerfLogger::open(&config, Arc::new(ThresholdRegistry::default()));
    let tracker = logger.tracker();
    let supervisor = ProcessSupervisor::with_tracker(
        ready_after(20),
        fast_config(),
        logger.clone(),
        tracker.clone(),
        Default::default(),
        Default::default(),
    );

    let plan = standard_plan(log_dir.clone(), None, supervisor.clone(), None);
    let report = StartupOrchestrator::new(logger.clone(), plan)
        .unwrap()
        .with_tracker(tracker)
        .with_supervisor(supervisor.clone())
        .run()
        .await;

    assert!(report.all_succeeded(), "{report}");
    assert!(!report.degraded_mode);
    assert_eq!(report.worker_state, Some(ProcessState::Ready));
    assert_eq!(report.stages[0].name, ENVIRONMENT_SETUP);
    assert!(report.stage(WORKER_SPAWN).unwrap().duration.is_some());

    supervisor.terminate().await;
    logger.flush();

    let summary = read_log(&log_dir.performance_log).unwrap();
    let names: Vec<&str> = summary.slowest.iter().map(|span| span.name.as_str()).collect();
    assert_eq!(names[0], COLD_START_SPAN);
    assert!(names.contains(&SETTINGS_LOAD));
    assert_eq!(summary.skipped_lines, 0);

    let span_named = |name: &str| summary.slowest.iter().find(|span| span.name == name).unwrap();
    let cold_start = span_named(COLD_START_SPAN);
    let worker_spawn = span_named(WORKER_SPAWN);
    let readiness = span_named(READINESS_SPAN);
    assert_eq!(worker_spawn.parent_id, Some(cold_start.id));
    assert_eq!(readiness.parent_id, Some(worker_spawn.id));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn failing_sink_never_breaks_startup() {
    let config = LoggerConfig {
        log_dir: "/dev".into(),
        file_name: "full".to_string(),
        mirror_to_tracing: false,
        ..LoggerConfig::default()
    };
    let logger = PerfLogger::open(&config, Arc::new(ThresholdRegistry::default()));
    let plan = StartupPlan::new()
        .stage(sleeping_stage("environment_setup", Category::Environment, 1))
        .stage(sleeping_stage(SETTINGS_LOAD, Category::Settings, 1).after("environment_setup"));

    let report = StartupOrchestrator::new(logger.clone(), plan)
        .unwrap()
        .run()
        .await;

    assert!(report.all_succeeded());
    assert!(logger.is_degraded());
    assert!(!logger.buffered_entries().is_empty());
}

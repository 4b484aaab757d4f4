//! Runs a [`StartupPlan`] and produces a [`StartupReport`].
//!
//! Every stage runs as its own tokio task inside a child span of the
//! `cold_start` span. A stage waits on its dependencies' completion signals,
//! so independent stages overlap. A stage that fails, panics or is skipped
//! marks its dependents as skipped; nothing ever propagates to the caller.

use anyhow::anyhow;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::report::{StageOutcome, StageReport, StartupReport};
use super::stage::{Stage, StageContext, StartupPlan};
use crate::error::ConfigurationError;
use crate::instrumentation::{Category, Metadata, Outcome, SpanGuard, SpanHandle, SpanTracker};
use crate::logger::{PerfLogger, Severity};
use crate::supervisor::{ProcessState, ProcessSupervisor};

pub const COLD_START_SPAN: &str = "cold_start";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

type StageSignal = watch::Receiver<Option<StageStatus>>;

pub struct StartupOrchestrator {
    logger: Arc<PerfLogger>,
    tracker: Arc<SpanTracker>,
    plan: StartupPlan,
    supervisor: Option<ProcessSupervisor>,
}

impl StartupOrchestrator {
    /// Validates the plan up front; a bad plan never starts.
    pub fn new(logger: Arc<PerfLogger>, plan: StartupPlan) -> Result<Self, ConfigurationError> {
        plan.validate()?;
        let tracker = logger.tracker();
        Ok(Self {
            logger,
            tracker,
            plan,
            supervisor: None,
        })
    }

    pub fn with_tracker(mut self, tracker: Arc<SpanTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// The supervisor whose final state decides `degraded_mode`.
    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn tracker(&self) -> &Arc<SpanTracker> {
        &self.tracker
    }

    pub async fn run(self) -> StartupReport {
        let Self {
            logger,
            tracker,
            plan,
            supervisor,
        } = self;

        let started = Instant::now();
        logger.startup_phase(
            COLD_START_SPAN,
            Metadata::new().with("stages", plan.stages.len()),
        );
        let root = tracker.start_span(COLD_START_SPAN, Category::Startup, Metadata::new());

        let mut signals: HashMap<String, StageSignal> = HashMap::new();
        let mut tasks = Vec::with_capacity(plan.stages.len());
        for stage in plan.stages {
            let dependencies: Vec<(String, StageSignal)> = stage
                .depends_on
                .iter()
                .filter_map(|name| signals.get(name).map(|rx| (name.clone(), rx.clone())))
                .collect();
            let (done, signal) = watch::channel(None);
            signals.insert(stage.name.clone(), signal);

            let name = stage.name.clone();
            let category = stage.category;
            let task = tokio::spawn(run_stage(
                stage,
                dependencies,
                done,
                root.clone(),
                logger.clone(),
            ));
            tasks.push((name, category, task));
        }

        let mut stages = Vec::with_capacity(tasks.len());
        for (name, category, task) in tasks {
            let report = match task.await {
                Ok(report) => report,
                Err(e) => {
                    error!(stage = %name, "Stage task did not complete: {}", e);
                    StageReport {
                        name,
                        category,
                        outcome: StageOutcome::Failed {
                            error: e.to_string(),
                        },
                        duration: None,
                        severity: None,
                    }
                }
            };
            stages.push(report);
        }

        let all_succeeded = stages
            .iter()
            .all(|stage| stage.outcome == StageOutcome::Succeeded);
        let outcome = if all_succeeded {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        let total_duration = root
            .close(outcome, Metadata::new().with("stages", stages.len()))
            .unwrap_or_else(|| started.elapsed());
        let total_severity = Severity::from(logger.detector().classify(
            COLD_START_SPAN,
            Category::Startup,
            total_duration,
            outcome,
        ));
        let worst_severity = stages
            .iter()
            .filter_map(|stage| stage.severity)
            .chain(std::iter::once(total_severity))
            .max()
            .unwrap_or(Severity::Info);

        let worker_state = supervisor.as_ref().map(ProcessSupervisor::state);
        let degraded_mode = worker_state == Some(ProcessState::Failed);

        let mut fields = Metadata::new()
            .with("total_ms", total_duration.as_millis() as u64)
            .with("worst_severity", worst_severity.to_string())
            .with("degraded_mode", degraded_mode);
        if let Some(state) = worker_state {
            fields.insert("worker_state", state.as_str());
        }
        logger.startup_phase("startup_complete", fields);
        if degraded_mode {
            logger.warn(
                "Worker unavailable, continuing in degraded mode",
                Metadata::new().with("remote_mode", true),
            );
        }
        info!(
            total_ms = total_duration.as_millis() as u64,
            %worst_severity,
            degraded_mode,
            "Startup finished"
        );

        StartupReport {
            stages,
            total_duration,
            total_severity,
            worst_severity,
            worker_state,
            degraded_mode,
        }
    }

    /// Runs on `runtime` without blocking the caller.
    pub fn spawn(self, runtime: &Handle) -> JoinHandle<StartupReport> {
        runtime.spawn(self.run())
    }

    /// Runs on `runtime` and hands the report to `callback` when done.
    pub fn spawn_with_callback<F>(self, runtime: &Handle, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(StartupReport) + Send + 'static,
    {
        runtime.spawn(async move { callback(self.run().await) })
    }
}

async fn run_stage(
    stage: Stage,
    dependencies: Vec<(String, StageSignal)>,
    done: watch::Sender<Option<StageStatus>>,
    root: SpanHandle,
    logger: Arc<PerfLogger>,
) -> StageReport {
    let Stage {
        name,
        category,
        run,
        ..
    } = stage;

    for (dependency, mut signal) in dependencies {
        let status = signal.wait_for(Option::is_some).await.ok().and_then(|s| *s);
        if status != Some(StageStatus::Succeeded) {
            logger.warn(
                format!("Skipping stage {name}"),
                Metadata::new()
                    .with("stage", name.as_str())
                    .with("dependency", dependency.as_str()),
            );
            done.send_replace(Some(StageStatus::Skipped));
            return StageReport {
                name,
                category,
                outcome: StageOutcome::Skipped { dependency },
                duration: None,
                severity: None,
            };
        }
    }

    let span = root.child(&name, category, Metadata::new());
    let guard = SpanGuard::new(span.clone());
    let context = StageContext {
        span,
        logger: logger.clone(),
    };

    let result = AssertUnwindSafe(async move { run(context).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(anyhow!("stage panicked: {}", panic_message(&*panic))));

    let (outcome, status, duration) = match result {
        Ok(metadata) => (
            StageOutcome::Succeeded,
            StageStatus::Succeeded,
            guard.success(metadata),
        ),
        Err(e) => {
            let error = format!("{e:#}");
            error!(stage = %name, "Stage failed: {}", error);
            let duration = guard.failure(Metadata::new().with("error", error.as_str()));
            (StageOutcome::Failed { error }, StageStatus::Failed, duration)
        }
    };

    let span_outcome = match status {
        StageStatus::Succeeded => Outcome::Success,
        _ => Outcome::Failure,
    };
    let severity = duration.map(|duration| {
        Severity::from(
            logger
                .detector()
                .classify(&name, category, duration, span_outcome),
        )
    });

    done.send_replace(Some(status));
    StageReport {
        name,
        category,
        outcome,
        duration,
        severity,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

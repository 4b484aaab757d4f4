use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::cli::commands::RunArgs;
use crate::config::Config;
use crate::logger::{init_global, PerfLogger};
use crate::logging::setup_logging;
use crate::orchestrator::{standard_plan, StartupOrchestrator};
use crate::supervisor::{HealthProbe, ProcessSupervisor, ReadinessProbe, WorkerCommand};
use crate::utils::workdir::LogDir;
use crate::{error_message, info_message, success_message, warning_message};

pub async fn run(config: Config, args: RunArgs, log_level: &str) -> Result<()> {
    let log_dir = LogDir::new(&config.log_dir);
    log_dir.init()?;
    if let Err(e) = setup_logging(&log_dir.path, log_level) {
        warning_message!("Diagnostics logging disabled: {:#}", e);
    }

    let logger = PerfLogger::open(&config.logger_config(), config.threshold_registry()?);
    let guard = init_global(logger.clone())?;

    let (program, worker_args) = args
        .worker
        .split_first()
        .context("No worker command given")?;
    let command = WorkerCommand::new(program)
        .args(worker_args.iter().cloned())
        .stderr_log(&log_dir.worker_stderr);
    let readiness = match args.liveness_ms {
        Some(ms) => ReadinessProbe::Liveness {
            settle: Duration::from_millis(ms),
        },
        None => ReadinessProbe::Handshake,
    };

    let tracker = logger.tracker();
    let supervisor = ProcessSupervisor::with_tracker(
        command,
        config.supervisor_config(),
        logger.clone(),
        tracker.clone(),
        readiness,
        HealthProbe::Alive,
    );
    let plan = standard_plan(log_dir.clone(), args.settings, supervisor.clone(), None);
    let orchestrator = StartupOrchestrator::new(logger.clone(), plan)?
        .with_tracker(tracker)
        .with_supervisor(supervisor.clone());

    info_message!("Starting worker: {}", args.worker.join(" "));
    let report = orchestrator.run().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    if report.degraded_mode {
        warning_message!("Worker failed to start; the host should continue in remote mode");
    } else if report.all_succeeded() {
        success_message!(
            "Startup completed in {:.1}ms",
            report.total_duration.as_secs_f64() * 1000.0
        );
        if args.hold {
            info_message!("Worker is running. Press Ctrl-C to stop it.");
            let mut states = supervisor.subscribe();
            tokio::select! {
                result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
                _ = states.wait_for(|state| state.is_terminal()) => {
                    warning_message!("Worker stopped: {}", supervisor.state());
                }
            }
        }
    }

    let result = supervisor.terminate().await;
    info_message!("Worker termination: {}", result.as_label());

    logger.flush();
    if let Some(reason) = logger.degraded_reason() {
        warning_message!("Performance log degraded: {}", reason);
    } else {
        info_message!("Performance log: {}", log_dir.performance_log.display());
    }
    drop(guard);

    if !report.all_succeeded() {
        for stage in report.failed_stages() {
            error_message!("Stage {} failed", stage.name);
        }
        bail!("startup finished with failed stages");
    }
    Ok(())
}

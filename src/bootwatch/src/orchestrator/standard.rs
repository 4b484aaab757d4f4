//! The host's default cold-start sequence.

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::stage::{Stage, StartupPlan};
use crate::instrumentation::{Category, Metadata};
use crate::supervisor::ProcessSupervisor;
use crate::utils::workdir::LogDir;

pub const ENVIRONMENT_SETUP: &str = "environment_setup";
pub const SETTINGS_LOAD: &str = "settings_load";
pub const UI_PANEL_LOAD: &str = "ui_panel_load";
pub const WORKER_SPAWN: &str = "worker_spawn";

/// `environment_setup`, then `settings_load`, `ui_panel_load` and
/// `worker_spawn` concurrently.
///
/// `settings` is an optional JSON settings file; `ui_panel` replaces the
/// no-op panel stage when the host has a real one.
pub fn standard_plan(
    log_dir: LogDir,
    settings: Option<PathBuf>,
    supervisor: ProcessSupervisor,
    ui_panel: Option<Stage>,
) -> StartupPlan {
    let ui_panel = ui_panel.unwrap_or_else(|| {
        Stage::new(UI_PANEL_LOAD, Category::Webview, |_| async {
            Ok(Metadata::new().with("placeholder", true))
        })
    });

    StartupPlan::new()
        .stage(Stage::new(
            ENVIRONMENT_SETUP,
            Category::Environment,
            move |ctx| async move {
                log_dir.init()?;
                ctx.logger.log_system_info();
                Ok(Metadata::new().with("log_dir", log_dir.path.display().to_string()))
            },
        ))
        .stage(
            Stage::new(SETTINGS_LOAD, Category::Settings, move |_| async move {
                load_settings(settings).await
            })
            .after(ENVIRONMENT_SETUP),
        )
        .stage(ui_panel.after(ENVIRONMENT_SETUP))
        .stage(
            Stage::new(WORKER_SPAWN, Category::Subprocess, move |ctx| async move {
                let pid = supervisor.launch_under(&ctx.span).await?;
                ctx.logger.log_memory_usage(WORKER_SPAWN);
                Ok(Metadata::new()
                    .with("pid", pid)
                    .with("restart_count", supervisor.handle().restart_count))
            })
            .after(ENVIRONMENT_SETUP),
        )
}

async fn load_settings(path: Option<PathBuf>) -> Result<Metadata> {
    let Some(path) = path else {
        return Ok(Metadata::new().with("source", "defaults"));
    };

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read settings {}", path.display()))?;
    let settings: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse settings {}", path.display()))?;

    Ok(Metadata::new()
        .with("source", path.display().to_string())
        .with("keys", settings.len()))
}

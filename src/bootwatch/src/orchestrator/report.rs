use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::instrumentation::Category;
use crate::logger::Severity;
use crate::supervisor::ProcessState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed { error: String },
    /// Not run because a dependency did not succeed.
    Skipped { dependency: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub category: Category,
    pub outcome: StageOutcome,
    /// Absent for skipped stages.
    #[serde(with = "duration_ms_opt")]
    pub duration: Option<Duration>,
    pub severity: Option<Severity>,
}

/// Summary of one orchestrated startup.
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub stages: Vec<StageReport>,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    /// Classification of the whole cold start.
    pub total_severity: Severity,
    /// Worst severity over the stages and the cold start.
    pub worst_severity: Severity,
    pub worker_state: Option<ProcessState>,
    /// The worker ended FAILED; the host should fall back to remote mode.
    pub degraded_mode: bool,
}

impl StartupReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn all_succeeded(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.outcome == StageOutcome::Succeeded)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageReport> {
        self.stages
            .iter()
            .filter(|stage| matches!(stage.outcome, StageOutcome::Failed { .. }))
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cold start: {:.1}ms [{}]",
            self.total_duration.as_secs_f64() * 1000.0,
            self.total_severity
        )?;
        for stage in &self.stages {
            let duration = stage
                .duration
                .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| "-".to_string());
            let severity = stage
                .severity
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            let outcome = match &stage.outcome {
                StageOutcome::Succeeded => "ok".to_string(),
                StageOutcome::Failed { error } => format!("failed: {error}"),
                StageOutcome::Skipped { dependency } => format!("skipped ({dependency} did not succeed)"),
            };
            writeln!(
                f,
                "  {:<20} {:>12} {:<10} {}",
                stage.name, duration, severity, outcome
            )?;
        }
        if let Some(state) = self.worker_state {
            writeln!(f, "Worker: {state}")?;
        }
        if self.degraded_mode {
            writeln!(f, "Degraded mode: worker unavailable, use remote mode")?;
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }
}

mod duration_ms_opt {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_secs_f64() * 1000.0)),
            None => serializer.serialize_none(),
        }
    }
}

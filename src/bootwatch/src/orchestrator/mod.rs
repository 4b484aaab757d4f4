mod report;
mod stage;
mod standard;
mod startup;

pub use report::{StageOutcome, StageReport, StartupReport};
pub use stage::{Stage, StageContext, StartupPlan};
pub use standard::{standard_plan, ENVIRONMENT_SETUP, SETTINGS_LOAD, UI_PANEL_LOAD, WORKER_SPAWN};
pub use startup::{StartupOrchestrator, COLD_START_SPAN};

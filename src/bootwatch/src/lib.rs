//! Startup diagnostics for a host application that launches an external
//! worker process: timed spans, threshold-based bottleneck detection, a
//! structured JSON-lines performance log, and a supervisor for the worker.

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod instrumentation;
pub mod logger;
pub mod logging;
pub mod orchestrator;
pub mod supervisor;
pub mod utils;

pub use error::{ConfigurationError, SinkWriteFailure, SupervisorError};

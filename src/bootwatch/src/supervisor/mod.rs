mod command;
mod config;
mod probe;
mod process_supervisor;
mod state;
pub mod termination;

pub use command::WorkerCommand;
pub use config::{BackoffPolicy, SupervisorConfig};
pub use probe::{parse_handshake, HandshakeLine, HealthProbe, ReadinessProbe};
pub use process_supervisor::{HealthStatus, ProcessSupervisor, READINESS_SPAN};
pub use state::{ProcessHandle, ProcessState};
pub use termination::TerminationResult;

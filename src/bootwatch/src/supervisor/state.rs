use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Unstarted,
    Starting,
    Ready,
    Degraded,
    Terminated,
    Failed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Unstarted => "UNSTARTED",
            ProcessState::Starting => "STARTING",
            ProcessState::Ready => "READY",
            ProcessState::Degraded => "DEGRADED",
            ProcessState::Terminated => "TERMINATED",
            ProcessState::Failed => "FAILED",
        }
    }

    /// FAILED and TERMINATED end a handle; a retry gets a fresh one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Failed | ProcessState::Terminated)
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: ProcessState) -> bool {
        use ProcessState::*;
        match (self, to) {
            (Terminated, Terminated) => false,
            (_, Terminated) => true,
            (Unstarted | Failed | Terminated, Starting) => true,
            (Starting, Ready | Failed) => true,
            (Ready, Degraded | Failed) => true,
            (Degraded, Ready | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle record of one worker process. Only the supervisor mutates it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub id: u64,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub started_at: Option<Instant>,
    pub last_health_check_at: Option<Instant>,
    pub restart_count: u32,
    pub consecutive_misses: u32,
    /// Earliest time a FAILED handle may be respawned.
    pub cooldown_until: Option<Instant>,
    /// Set by `re_enable` to allow spawning out of TERMINATED.
    pub re_enabled: bool,
}

impl ProcessHandle {
    pub fn new(id: u64, restart_count: u32) -> Self {
        Self {
            id,
            state: ProcessState::Unstarted,
            pid: None,
            started_at: None,
            last_health_check_at: None,
            restart_count,
            consecutive_misses: 0,
            cooldown_until: None,
            re_enabled: false,
        }
    }
}

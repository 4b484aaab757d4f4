//! Readiness and health probes.

use std::time::Duration;

use crate::constants::{READY_STATUS_FIELD, READY_STATUS_SUCCESS};

/// How the supervisor decides a STARTING worker is READY.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ReadinessProbe {
    /// The worker prints a JSON line such as `{"status": "success"}` on stdout.
    /// Any other `status` value fails the probe immediately; lines that are
    /// not JSON objects with a `status` field are ignored.
    #[default]
    Handshake,
    /// The worker counts as ready once it has stayed alive for `settle`.
    Liveness { settle: Duration },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum HealthProbe {
    /// Healthy while the process has not exited.
    #[default]
    Alive,
    /// Writes `request` to the worker's stdin and expects a stdout line
    /// containing `expect` within the probe timeout.
    Ping { request: String, expect: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeLine {
    Ready,
    NotReady(String),
    Ignored,
}

pub fn parse_handshake(line: &str) -> HandshakeLine {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
        return HandshakeLine::Ignored;
    };
    match value.get(READY_STATUS_FIELD) {
        Some(serde_json::Value::String(status)) if status == READY_STATUS_SUCCESS => {
            HandshakeLine::Ready
        }
        Some(_) => HandshakeLine::NotReady(line.trim().to_string()),
        None => HandshakeLine::Ignored,
    }
}

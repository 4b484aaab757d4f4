use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::instrumentation::{Category, Classification, ClosedSpan, Metadata, Outcome, SpanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Bottleneck,
}

impl From<Classification> for Severity {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Ok => Severity::Info,
            Classification::Warn => Severity::Warn,
            Classification::Critical => Severity::Bottleneck,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warn => f.write_str("WARN"),
            Severity::Bottleneck => f.write_str("BOTTLENECK"),
        }
    }
}

/// The span part of a log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanSnapshot {
    pub id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SpanId>,
    pub name: String,
    pub category: Category,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub outcome: Outcome,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<ClosedSpan> for SpanSnapshot {
    fn from(span: ClosedSpan) -> Self {
        Self {
            id: span.id,
            parent_id: span.parent_id,
            name: span.name,
            category: span.category,
            started_at: span.started_at,
            duration_ms: round_ms(span.duration.as_secs_f64() * 1000.0),
            outcome: span.outcome,
            metadata: span.metadata,
        }
    }
}

/// One line of the performance log. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the logger was opened.
    pub elapsed_ms: f64,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SpanSnapshot>,
    #[serde(default)]
    pub fields: Metadata,
}

impl LogEntry {
    pub fn span_name(&self) -> Option<&str> {
        self.span.as_ref().map(|s| s.name.as_str())
    }

    pub fn to_json_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

pub(crate) fn round_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

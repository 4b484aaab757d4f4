use std::sync::Arc;
use std::time::Duration;

use super::metadata::Metadata;
use super::span::{ClosedSpan, Outcome};
use super::thresholds::{Category, Classification, Threshold, ThresholdRegistry};
use crate::utils::system_info;

/// Verdict for one closed span.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub classification: Classification,
    pub threshold: Threshold,
    pub overrun_pct: f64,
    /// Extra fields for the log entry: overrun for WARN, plus captured
    /// context for CRITICAL.
    pub context: Metadata,
}

/// Classifies closed spans against the threshold registry.
///
/// Holds no state between calls, so results do not depend on call order.
#[derive(Debug, Clone)]
pub struct BottleneckDetector {
    registry: Arc<ThresholdRegistry>,
    capture_memory: bool,
}

impl BottleneckDetector {
    pub fn new(registry: Arc<ThresholdRegistry>) -> Self {
        Self {
            registry,
            capture_memory: true,
        }
    }

    /// Disables the sysinfo lookup on CRITICAL spans.
    pub fn without_memory_capture(mut self) -> Self {
        self.capture_memory = false;
        self
    }

    pub fn registry(&self) -> &ThresholdRegistry {
        &self.registry
    }

    /// Classification of a span without building the log context.
    pub fn classify(
        &self,
        name: &str,
        category: Category,
        duration: Duration,
        outcome: Outcome,
    ) -> Classification {
        let threshold = self.registry.threshold_for_span(name, category);
        escalate(threshold.classify(duration), outcome)
    }

    pub fn evaluate(&self, span: &ClosedSpan) -> Assessment {
        let threshold = self.registry.threshold_for_span(&span.name, span.category);
        let classification = escalate(threshold.classify(span.duration), span.outcome);

        let overrun_pct = threshold.overrun_pct(span.duration);
        let mut context = Metadata::new();

        if classification >= Classification::Warn {
            context.insert("threshold_ms", threshold.warn_at.as_millis() as u64);
            context.insert("overrun_pct", overrun_pct);
        }

        if classification == Classification::Critical {
            context.insert("critical_at_ms", threshold.critical_at.as_millis() as u64);
            context.insert("outcome", span.outcome.to_string());
            if self.capture_memory {
                if let Some(memory_mb) = system_info::current_memory_mb() {
                    context.insert("memory_mb", memory_mb);
                }
            }
        }

        Assessment {
            classification,
            threshold,
            overrun_pct,
            context,
        }
    }
}

// A timed-out span is always critical; a failed one only once it blew its budget.
fn escalate(classification: Classification, outcome: Outcome) -> Classification {
    match outcome {
        Outcome::TimedOut => Classification::Critical,
        Outcome::Failure if classification == Classification::Warn => Classification::Critical,
        _ => classification,
    }
}

pub mod detector;
pub mod metadata;
pub mod span;
pub mod thresholds;

pub use detector::{Assessment, BottleneckDetector};
pub use metadata::{MetaValue, Metadata};
pub use span::{ClosedSpan, Outcome, SpanGuard, SpanHandle, SpanId, SpanSink, SpanTracker};
pub use thresholds::{Category, Classification, Threshold, ThresholdRegistry};

pub mod entry;
pub mod perf_logger;
pub mod sink;
pub mod summary;

pub use entry::{LogEntry, Severity, SpanSnapshot};
pub use perf_logger::{
    global, init_global, teardown_global, EmitStatus, LoggerConfig, LoggerGuard, PerfLogger,
};
pub use sink::{EntrySink, FallbackBuffer, FileSink};
pub use summary::{read_log, LogSummary};

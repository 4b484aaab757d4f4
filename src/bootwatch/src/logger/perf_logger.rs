//! The structured performance logger.
//!
//! Entries get a sequence number when they are created and are written to
//! the sink strictly in that order, even when emitted from several threads.
//! If the sink fails the logger switches to an in-memory ring for the rest of
//! its life; `emit` never returns an error.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tracing::{error, info, warn};

use super::entry::{round_ms, LogEntry, Severity, SpanSnapshot};
use super::sink::{EntrySink, FallbackBuffer, FileSink};
use crate::constants::{DEFAULT_FALLBACK_BUFFER_CAPACITY, DEFAULT_LOG_ROTATION_SIZE_BYTES, PERFORMANCE_LOG_FILE};
use crate::error::SinkWriteFailure;
use crate::instrumentation::{
    BottleneckDetector, ClosedSpan, Metadata, SpanSink, SpanTracker, ThresholdRegistry,
};
use crate::utils::system_info;

// Entries waiting on a missing predecessor are force-written past this.
const MAX_PENDING: usize = 256;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub log_dir: PathBuf,
    pub file_name: String,
    pub rotation_size_bytes: u64,
    pub fallback_capacity: usize,
    pub mirror_to_tracing: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(crate::constants::DEFAULT_LOG_DIR),
            file_name: PERFORMANCE_LOG_FILE.to_string(),
            rotation_size_bytes: DEFAULT_LOG_ROTATION_SIZE_BYTES,
            fallback_capacity: DEFAULT_FALLBACK_BUFFER_CAPACITY,
            mirror_to_tracing: true,
        }
    }
}

impl LoggerConfig {
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }
}

/// What happened to an emitted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStatus {
    /// Written to the durable sink (possibly together with queued predecessors).
    Persisted,
    /// Held until an entry with a lower sequence number arrives.
    Queued,
    /// Kept in the in-memory fallback ring.
    Buffered,
}

struct LoggerState {
    sink: Option<Box<dyn EntrySink>>,
    next_to_write: u64,
    pending: BTreeMap<u64, LogEntry>,
    fallback: FallbackBuffer,
    degraded_reason: Option<String>,
}

pub struct PerfLogger {
    detector: BottleneckDetector,
    seq: AtomicU64,
    started: Instant,
    mirror_to_tracing: bool,
    state: Mutex<LoggerState>,
}

impl PerfLogger {
    /// Opens the file sink described by `config`. If it cannot be opened the
    /// logger starts out degraded instead of failing.
    pub fn open(config: &LoggerConfig, registry: Arc<ThresholdRegistry>) -> Arc<Self> {
        let path = config.log_path();
        match FileSink::open(&path, config.rotation_size_bytes) {
            Ok(sink) => {
                info!("Performance log writing to {}", path.display());
                Self::with_sink(Some(Box::new(sink)), config, registry)
            }
            Err(e) => {
                let failure = SinkWriteFailure(e);
                warn!(
                    label = failure.as_label(),
                    "Cannot open performance log {}: {}", path.display(), failure
                );
                let logger = Self::with_sink(None, config, registry);
                logger.lock_state().degraded_reason = Some(failure.to_string());
                logger
            }
        }
    }

    /// A logger without a durable sink; entries go straight to the ring.
    pub fn in_memory(config: &LoggerConfig, registry: Arc<ThresholdRegistry>) -> Arc<Self> {
        Self::with_sink(None, config, registry)
    }

    pub fn with_sink(
        sink: Option<Box<dyn EntrySink>>,
        config: &LoggerConfig,
        registry: Arc<ThresholdRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            detector: BottleneckDetector::new(registry),
            seq: AtomicU64::new(1),
            started: Instant::now(),
            mirror_to_tracing: config.mirror_to_tracing,
            state: Mutex::new(LoggerState {
                sink,
                next_to_write: 1,
                pending: BTreeMap::new(),
                fallback: FallbackBuffer::new(config.fallback_capacity),
                degraded_reason: None,
            }),
        })
    }

    /// A span tracker reporting into this logger.
    pub fn tracker(self: &Arc<Self>) -> Arc<SpanTracker> {
        SpanTracker::new(self.clone())
    }

    pub fn detector(&self) -> &BottleneckDetector {
        &self.detector
    }

    fn lock_state(&self) -> MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates an entry carrying the next sequence number.
    pub fn new_entry(&self, severity: Severity, message: impl Into<String>) -> LogEntry {
        LogEntry {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            elapsed_ms: round_ms(self.started.elapsed().as_secs_f64() * 1000.0),
            severity,
            message: message.into(),
            span: None,
            fields: Metadata::new(),
        }
    }

    pub fn emit(&self, entry: LogEntry) -> EmitStatus {
        if self.mirror_to_tracing {
            mirror(&entry);
        }

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.sink.is_none() {
            if entry.seq >= state.next_to_write {
                state.next_to_write = entry.seq + 1;
            }
            state.fallback.push(entry);
            return EmitStatus::Buffered;
        }

        if entry.seq < state.next_to_write {
            // Arrived after a flush already wrote past it.
            return Self::write_entry(state, entry);
        }

        let seq = entry.seq;
        state.pending.insert(seq, entry);

        let mut status = EmitStatus::Queued;
        while let Some(next) = state.pending.remove(&state.next_to_write) {
            state.next_to_write += 1;
            let written = next.seq == seq;
            let result = Self::write_entry(state, next);
            if written {
                status = result;
            }
        }

        if state.pending.len() > MAX_PENDING {
            Self::drain_pending(state);
            status = if state.sink.is_some() {
                EmitStatus::Persisted
            } else {
                EmitStatus::Buffered
            };
        }
        status
    }

    fn write_entry(state: &mut LoggerState, entry: LogEntry) -> EmitStatus {
        let Some(sink) = state.sink.as_mut() else {
            state.fallback.push(entry);
            return EmitStatus::Buffered;
        };

        let result = entry
            .to_json_line()
            .map_err(std::io::Error::from)
            .and_then(|line| sink.write_line(&line));

        match result {
            Ok(()) => EmitStatus::Persisted,
            Err(e) => {
                let failure = SinkWriteFailure(e);
                warn!(
                    label = failure.as_label(),
                    "Performance log sink {} failed, keeping entries in memory: {}",
                    sink.describe(),
                    failure
                );
                state.sink = None;
                state.degraded_reason = Some(failure.to_string());
                state.fallback.push(entry);
                Self::drain_pending(state);
                EmitStatus::Buffered
            }
        }
    }

    fn drain_pending(state: &mut LoggerState) {
        let pending = std::mem::take(&mut state.pending);
        for (seq, entry) in pending {
            state.next_to_write = state.next_to_write.max(seq + 1);
            Self::write_entry(state, entry);
        }
    }

    /// Writes every queued entry in sequence order and flushes the sink.
    pub fn flush(&self) {
        let mut state = self.lock_state();
        Self::drain_pending(&mut state);
        if let Some(sink) = state.sink.as_mut() {
            if let Err(e) = sink.flush() {
                let failure = SinkWriteFailure(e);
                warn!(label = failure.as_label(), "Performance log flush failed: {}", failure);
                state.sink = None;
                state.degraded_reason = Some(failure.to_string());
            }
        }
    }

    /// Flushes and releases the durable sink. Later entries are kept in memory.
    pub fn shutdown(&self) {
        self.flush();
        let mut state = self.lock_state();
        if let Some(sink) = state.sink.take() {
            info!("Performance log {} closed", sink.describe());
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.lock_state().degraded_reason.is_some()
    }

    pub fn degraded_reason(&self) -> Option<String> {
        self.lock_state().degraded_reason.clone()
    }

    /// Entries held in the in-memory ring.
    pub fn buffered_entries(&self) -> Vec<LogEntry> {
        self.lock_state().fallback.snapshot()
    }

    /// Evaluates a closed span and emits it with the resulting severity.
    pub fn record_span(&self, span: ClosedSpan) -> EmitStatus {
        let assessment = self.detector.evaluate(&span);
        let severity = Severity::from(assessment.classification);

        let duration_ms = round_ms(span.duration.as_secs_f64() * 1000.0);
        let message = match severity {
            Severity::Info => format!("Completed {} in {:.1}ms", span.name, duration_ms),
            Severity::Warn | Severity::Bottleneck => format!(
                "Performance bottleneck detected: {} took {:.1}ms (threshold: {}ms)",
                span.name,
                duration_ms,
                assessment.threshold.warn_at.as_millis()
            ),
        };

        let mut entry = self.new_entry(severity, message);
        entry.fields = assessment.context;
        entry.span = Some(SpanSnapshot::from(span));
        self.emit(entry)
    }

    pub fn event(&self, severity: Severity, message: impl Into<String>, fields: Metadata) -> EmitStatus {
        let mut entry = self.new_entry(severity, message);
        entry.fields = fields;
        self.emit(entry)
    }

    pub fn info(&self, message: impl Into<String>, fields: Metadata) -> EmitStatus {
        self.event(Severity::Info, message, fields)
    }

    pub fn warn(&self, message: impl Into<String>, fields: Metadata) -> EmitStatus {
        self.event(Severity::Warn, message, fields)
    }

    /// Marks a major startup phase.
    pub fn startup_phase(&self, phase: &str, fields: Metadata) -> EmitStatus {
        let mut all_fields = Metadata::new().with("phase", phase);
        all_fields.extend(fields);
        self.info(format!("Startup Phase: {phase}"), all_fields)
    }

    pub fn log_system_info(&self) -> EmitStatus {
        self.info("System Information", system_info::host_context())
    }

    pub fn log_memory_usage(&self, operation: &str) -> Option<f64> {
        let memory_mb = system_info::current_memory_mb();
        match memory_mb {
            Some(mb) => self.info(
                format!("Memory usage: {mb:.1} MB"),
                Metadata::new().with("operation", operation).with("memory_mb", mb),
            ),
            None => self.info(
                "Memory usage not available on this platform",
                Metadata::new().with("operation", operation),
            ),
        };
        memory_mb
    }
}

impl SpanSink for PerfLogger {
    fn span_closed(&self, span: ClosedSpan) {
        self.record_span(span);
    }

    fn programming_error(&self, message: &str, fields: Metadata) {
        error!("Instrumentation misuse: {}", message);
        self.warn(message, fields.with("programming_error", true));
    }
}

impl Drop for PerfLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

fn mirror(entry: &LogEntry) {
    let span_name = entry.span_name().unwrap_or("-");
    match entry.severity {
        Severity::Info => info!(seq = entry.seq, span_name, "{}", entry.message),
        Severity::Warn => warn!(seq = entry.seq, span_name, "{}", entry.message),
        Severity::Bottleneck => {
            warn!(seq = entry.seq, span_name, bottleneck = true, "{}", entry.message)
        }
    }
}

static GLOBAL_LOGGER: RwLock<Option<Arc<PerfLogger>>> = RwLock::new(None);

/// Keeps the process-wide logger installed; tears it down when dropped.
#[must_use = "dropping the guard tears the global logger down"]
pub struct LoggerGuard {
    logger: Arc<PerfLogger>,
}

impl LoggerGuard {
    pub fn logger(&self) -> &Arc<PerfLogger> {
        &self.logger
    }
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        teardown_global();
    }
}

/// Installs `logger` as the process-wide instance. Called from the host's
/// load hook; fails if a logger is already installed.
pub fn init_global(logger: Arc<PerfLogger>) -> anyhow::Result<LoggerGuard> {
    let mut slot = GLOBAL_LOGGER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_some() {
        anyhow::bail!("performance logger is already initialized");
    }
    *slot = Some(logger.clone());
    Ok(LoggerGuard { logger })
}

pub fn global() -> Option<Arc<PerfLogger>> {
    GLOBAL_LOGGER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Removes the process-wide logger and releases its sink.
pub fn teardown_global() {
    let logger = GLOBAL_LOGGER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(logger) = logger {
        logger.shutdown();
    }
}

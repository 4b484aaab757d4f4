//! Monotonic spans for named units of work.
//!
//! Spans are opened through a [`SpanTracker`] and closed exactly once; the
//! closed record is handed to a [`SpanSink`] (normally the performance
//! logger). Parent/child links are explicit ids, so a span opened in one stage
//! and closed from a callback of another still links correctly.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use super::metadata::Metadata;
use super::thresholds::Category;

pub type SpanId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// The work was abandoned at a deadline.
    TimedOut,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure => f.write_str("failure"),
            Outcome::TimedOut => f.write_str("timed_out"),
        }
    }
}

/// Immutable record of a finished span.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedSpan {
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub name: String,
    pub category: Category,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Outcome,
    pub metadata: Metadata,
}

/// Receiver of closed spans and instrumentation misuse reports.
pub trait SpanSink: Send + Sync {
    fn span_closed(&self, span: ClosedSpan);

    fn programming_error(&self, message: &str, fields: Metadata);
}

struct OpenSpan {
    parent_id: Option<SpanId>,
    name: String,
    category: Category,
    started_at: DateTime<Utc>,
    start: Instant,
    metadata: Metadata,
}

/// Tracks open spans and closes them exactly once.
pub struct SpanTracker {
    open: DashMap<SpanId, OpenSpan>,
    next_id: AtomicU64,
    sink: Arc<dyn SpanSink>,
}

/// Reference to an open (or already closed) span.
#[derive(Clone)]
pub struct SpanHandle {
    id: SpanId,
    name: Arc<str>,
    tracker: Arc<SpanTracker>,
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl SpanTracker {
    pub fn new(sink: Arc<dyn SpanSink>) -> Arc<Self> {
        Arc::new(Self {
            open: DashMap::new(),
            next_id: AtomicU64::new(1),
            sink,
        })
    }

    pub fn start_span(
        self: &Arc<Self>,
        name: &str,
        category: Category,
        metadata: Metadata,
    ) -> SpanHandle {
        self.open_span(name, category, None, metadata)
    }

    pub fn start_child(
        self: &Arc<Self>,
        parent: &SpanHandle,
        name: &str,
        category: Category,
        metadata: Metadata,
    ) -> SpanHandle {
        if self.open.contains_key(&parent.id) {
            return self.open_span(name, category, Some(parent.id), metadata);
        }

        self.sink.programming_error(
            "child span started under a parent that is already closed",
            Metadata::new()
                .with("span", name)
                .with("parent", parent.name.as_ref())
                .with("parent_id", parent.id),
        );
        self.open_span(
            name,
            category,
            None,
            metadata.with("orphaned_parent_id", parent.id),
        )
    }

    fn open_span(
        self: &Arc<Self>,
        name: &str,
        category: Category,
        parent_id: Option<SpanId>,
        metadata: Metadata,
    ) -> SpanHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(span = name, id, ?parent_id, "span opened");

        self.open.insert(
            id,
            OpenSpan {
                parent_id,
                name: name.to_string(),
                category,
                started_at: Utc::now(),
                start: Instant::now(),
                metadata,
            },
        );

        SpanHandle {
            id,
            name: Arc::from(name),
            tracker: Arc::clone(self),
        }
    }

    /// Closes `handle`. Returns `None` (and reports a programming error) when
    /// it was already closed.
    pub fn close(&self, handle: &SpanHandle, outcome: Outcome, extra: Metadata) -> Option<Duration> {
        match self.close_id(handle.id, outcome, extra) {
            Some(duration) => Some(duration),
            None => {
                error!(span = %handle.name, id = handle.id, "span closed more than once");
                self.sink.programming_error(
                    "span closed more than once",
                    Metadata::new()
                        .with("span", handle.name.as_ref())
                        .with("span_id", handle.id),
                );
                None
            }
        }
    }

    fn close_id(&self, id: SpanId, outcome: Outcome, extra: Metadata) -> Option<Duration> {
        // Children first, so a child never outlives its parent.
        let children: Vec<SpanId> = self
            .open
            .iter()
            .filter(|entry| entry.value().parent_id == Some(id))
            .map(|entry| *entry.key())
            .collect();
        for child in children {
            self.close_id(
                child,
                Outcome::Failure,
                Metadata::new().with("closed_by_parent", true),
            );
        }

        let (_, open) = self.open.remove(&id)?;
        let duration = open.start.elapsed();

        let mut metadata = open.metadata;
        metadata.extend(extra);

        self.sink.span_closed(ClosedSpan {
            id,
            parent_id: open.parent_id,
            name: open.name,
            category: open.category,
            started_at: open.started_at,
            duration,
            outcome,
            metadata,
        });
        Some(duration)
    }

    pub fn is_open(&self, handle: &SpanHandle) -> bool {
        self.open.contains_key(&handle.id)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Runs `fut` inside a span closed with the result's outcome.
    pub async fn timed<T, E, F>(
        self: &Arc<Self>,
        name: &str,
        category: Category,
        metadata: Metadata,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let guard = SpanGuard::new(self.start_span(name, category, metadata));
        let result = fut.await;
        match &result {
            Ok(_) => guard.success(Metadata::new()),
            Err(e) => guard.failure(Metadata::new().with("error", e.to_string())),
        };
        result
    }
}

impl SpanHandle {
    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracker(&self) -> &Arc<SpanTracker> {
        &self.tracker
    }

    pub fn close(&self, outcome: Outcome, extra: Metadata) -> Option<Duration> {
        self.tracker.close(self, outcome, extra)
    }

    pub fn child(&self, name: &str, category: Category, metadata: Metadata) -> SpanHandle {
        self.tracker.start_child(self, name, category, metadata)
    }
}

/// Closes its span with a failure outcome when dropped unfinished.
pub struct SpanGuard {
    handle: Option<SpanHandle>,
}

impl SpanGuard {
    pub fn new(handle: SpanHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<&SpanHandle> {
        self.handle.as_ref()
    }

    pub fn success(mut self, extra: Metadata) -> Option<Duration> {
        self.handle.take()?.close(Outcome::Success, extra)
    }

    pub fn failure(mut self, extra: Metadata) -> Option<Duration> {
        self.handle.take()?.close(Outcome::Failure, extra)
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.tracker.is_open(&handle) {
                handle.close(Outcome::Failure, Metadata::new().with("dropped", true));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub closed: Mutex<Vec<ClosedSpan>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl SpanSink for RecordingSink {
        fn span_closed(&self, span: ClosedSpan) {
            self.closed.lock().unwrap().push(span);
        }

        fn programming_error(&self, message: &str, _fields: Metadata) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn tracker() -> (Arc<SpanTracker>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (SpanTracker::new(sink.clone()), sink)
    }

    #[test]
    fn test_close_twice_is_reported_once_logged() {
        let (tracker, sink) = tracker();
        let span = tracker.start_span("load_settings", Category::Settings, Metadata::new());

        assert!(span.close(Outcome::Success, Metadata::new()).is_some());
        assert!(span.close(Outcome::Failure, Metadata::new()).is_none());

        assert_eq!(sink.closed.lock().unwrap().len(), 1);
        assert_eq!(sink.closed.lock().unwrap()[0].outcome, Outcome::Success);
        assert_eq!(sink.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_extra_metadata_is_appended() {
        let (tracker, sink) = tracker();
        let span = tracker.start_span(
            "spawn_worker",
            Category::Subprocess,
            Metadata::new().with("program", "python"),
        );
        span.close(Outcome::Success, Metadata::new().with("pid", 42));

        let closed = sink.closed.lock().unwrap();
        let keys: Vec<&str> = closed[0].metadata.keys().collect();
        assert_eq!(keys, vec!["program", "pid"]);
    }

    #[test]
    fn test_parent_close_closes_children_first() {
        let (tracker, sink) = tracker();
        let parent = tracker.start_span("cold_start", Category::Startup, Metadata::new());
        let child = parent.child("ui_panel_load", Category::Webview, Metadata::new());
        std::thread::sleep(Duration::from_millis(5));

        parent.close(Outcome::Success, Metadata::new());

        let closed = sink.closed.lock().unwrap();
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].name, "ui_panel_load");
        assert_eq!(closed[0].parent_id, Some(parent.id()));
        assert_eq!(closed[0].outcome, Outcome::Failure);
        assert!(closed[0].duration <= closed[1].duration);
        assert!(!tracker.is_open(&child));
    }

    #[test]
    fn test_child_of_closed_parent_is_detached() {
        let (tracker, sink) = tracker();
        let parent = tracker.start_span("stage", Category::Generic, Metadata::new());
        parent.close(Outcome::Success, Metadata::new());

        let child = parent.child("late_callback", Category::Generic, Metadata::new());
        child.close(Outcome::Success, Metadata::new());

        let closed = sink.closed.lock().unwrap();
        assert_eq!(closed[1].parent_id, None);
        assert!(closed[1].metadata.get("orphaned_parent_id").is_some());
        assert_eq!(sink.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_guard_closes_on_drop_with_failure() {
        let (tracker, sink) = tracker();
        {
            let _guard = SpanGuard::new(tracker.start_span(
                "ui_panel_load",
                Category::Webview,
                Metadata::new(),
            ));
        }
        let closed = sink.closed.lock().unwrap();
        assert_eq!(closed[0].outcome, Outcome::Failure);
        assert_eq!(tracker.open_count(), 0);
    }

    #[tokio::test]
    async fn test_timed_records_error_outcome() {
        let (tracker, sink) = tracker();
        let result: Result<(), String> = tracker
            .timed("load_settings", Category::Settings, Metadata::new(), async {
                Err("settings file missing".to_string())
            })
            .await;

        assert!(result.is_err());
        let closed = sink.closed.lock().unwrap();
        assert_eq!(closed[0].outcome, Outcome::Failure);
        assert_eq!(
            closed[0].metadata.get("error").map(|v| v.to_string()),
            Some("settings file missing".to_string())
        );
    }

    #[test]
    fn test_concurrent_close_happens_once() {
        let (tracker, sink) = tracker();
        let span = tracker.start_span("race", Category::Generic, Metadata::new());

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let span = span.clone();
                std::thread::spawn(move || span.close(Outcome::Success, Metadata::new()))
            })
            .collect();
        let closed_ok = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .count();

        assert_eq!(closed_ok, 1);
        assert_eq!(sink.closed.lock().unwrap().len(), 1);
        assert_eq!(sink.errors.lock().unwrap().len(), 7);
    }
}

//! Lifecycle management for the external worker process.
//!
//! A [`ProcessSupervisor`] owns exactly one worker at a time. The handle
//! record lives behind a std mutex that is never held across I/O or an
//! `.await`; the child process itself lives behind a tokio mutex. Every
//! operation that touches the child re-checks the handle id, so a spawn racing
//! a terminate can never leave a process behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::WorkerCommand;
use super::config::SupervisorConfig;
use super::probe::{parse_handshake, HandshakeLine, HealthProbe, ReadinessProbe};
use super::state::{ProcessHandle, ProcessState};
use super::termination::{self, TerminationResult};
use crate::error::SupervisorError;
use crate::instrumentation::{Category, Metadata, Outcome, SpanHandle, SpanTracker};
use crate::logger::{PerfLogger, Severity};

/// Name of the SUBPROCESS span bracketing STARTING -> READY.
pub const READINESS_SPAN: &str = "worker_readiness";

// Stdout lines kept for the probes; older output is dropped.
const LINE_BUFFER: usize = 256;

/// Outcome of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Passed after one or more misses; DEGRADED -> READY.
    Recovered,
    Missed { misses: u32 },
    /// Miss limit reached; the worker is FAILED and was killed.
    Failed { misses: u32 },
    /// The worker was not in a checkable state.
    Skipped(ProcessState),
}

enum Readiness {
    Pending,
    Ready,
    Failed(SupervisorError),
    Gone,
}

struct Transition {
    from: ProcessState,
    to: ProcessState,
    handle_id: u64,
    pid: Option<u32>,
    restart_count: u32,
}

struct WorkerProcess {
    handle_id: u64,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::Receiver<String>,
}

struct Shared {
    command: WorkerCommand,
    config: SupervisorConfig,
    readiness: ReadinessProbe,
    health: HealthProbe,
    logger: Arc<PerfLogger>,
    tracker: Arc<SpanTracker>,
    next_handle_id: AtomicU64,
    handle: Mutex<ProcessHandle>,
    worker: tokio::sync::Mutex<Option<WorkerProcess>>,
    readiness_span: Mutex<Option<(u64, SpanHandle)>>,
    state_tx: watch::Sender<ProcessState>,
    shutdown: Mutex<CancellationToken>,
    monitor: Mutex<Option<CancellationToken>>,
}

/// Supervises one worker process. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

impl ProcessSupervisor {
    pub fn new(command: WorkerCommand, config: SupervisorConfig, logger: Arc<PerfLogger>) -> Self {
        Self::with_probes(
            command,
            config,
            logger,
            ReadinessProbe::default(),
            HealthProbe::default(),
        )
    }

    pub fn with_probes(
        command: WorkerCommand,
        config: SupervisorConfig,
        logger: Arc<PerfLogger>,
        readiness: ReadinessProbe,
        health: HealthProbe,
    ) -> Self {
        let tracker = logger.tracker();
        Self::with_tracker(command, config, logger, tracker, readiness, health)
    }

    /// Reports spans through `tracker`, so they can nest under spans the
    /// caller opened on the same tracker.
    pub fn with_tracker(
        command: WorkerCommand,
        config: SupervisorConfig,
        logger: Arc<PerfLogger>,
        tracker: Arc<SpanTracker>,
        readiness: ReadinessProbe,
        health: HealthProbe,
    ) -> Self {
        let (state_tx, _) = watch::channel(ProcessState::Unstarted);
        Self {
            shared: Arc::new(Shared {
                command,
                config,
                readiness,
                health,
                logger,
                tracker,
                next_handle_id: AtomicU64::new(2),
                handle: Mutex::new(ProcessHandle::new(1, 0)),
                worker: tokio::sync::Mutex::new(None),
                readiness_span: Mutex::new(None),
                state_tx,
                shutdown: Mutex::new(CancellationToken::new()),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ProcessState {
        self.lock_handle().state
    }

    /// Snapshot of the current handle.
    pub fn handle(&self) -> ProcessHandle {
        self.lock_handle().clone()
    }

    /// Receives every state change, including permanent failure.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.shared.state_tx.subscribe()
    }

    fn lock_handle(&self) -> MutexGuard<'_, ProcessHandle> {
        self.shared
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_span(&self) -> MutexGuard<'_, Option<(u64, SpanHandle)>> {
        self.shared
            .readiness_span
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_monitor(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.shared
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shared
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn is_current(&self, handle_id: u64, state: ProcessState) -> bool {
        let handle = self.lock_handle();
        handle.id == handle_id && handle.state == state
    }

    /// Applies a transition to the locked handle and publishes the new state.
    fn transition(&self, handle: &mut ProcessHandle, to: ProcessState) -> Option<Transition> {
        let from = handle.state;
        if !from.can_transition_to(to) {
            debug!(%from, %to, handle_id = handle.id, "Ignoring invalid transition");
            return None;
        }
        handle.state = to;
        self.shared.state_tx.send_replace(to);
        Some(Transition {
            from,
            to,
            handle_id: handle.id,
            pid: handle.pid,
            restart_count: handle.restart_count,
        })
    }

    fn mark_failed(&self, handle: &mut ProcessHandle) -> Option<Transition> {
        let transition = self.transition(handle, ProcessState::Failed)?;
        handle.cooldown_until =
            Some(Instant::now() + self.shared.config.backoff.next(handle.restart_count));
        Some(transition)
    }

    /// Emits the structured event for a transition. Must not be called with
    /// the handle lock held.
    fn publish(&self, transition: Option<Transition>, fields: Metadata) {
        let Some(transition) = transition else {
            return;
        };

        let mut all = Metadata::new()
            .with("from", transition.from.as_str())
            .with("to", transition.to.as_str())
            .with("handle_id", transition.handle_id)
            .with("restart_count", transition.restart_count);
        if let Some(pid) = transition.pid {
            all.insert("pid", pid);
        }
        all.extend(fields);

        let severity = match transition.to {
            ProcessState::Failed | ProcessState::Degraded => Severity::Warn,
            _ => Severity::Info,
        };
        info!(
            from = %transition.from,
            to = %transition.to,
            handle_id = transition.handle_id,
            "Worker state changed"
        );
        self.shared.logger.event(
            severity,
            format!("Worker {} -> {}", transition.from, transition.to),
            all,
        );
    }

    fn close_readiness_span(&self, handle_id: u64, outcome: Outcome, extra: Metadata) {
        let span = {
            let mut slot = self.lock_span();
            if slot.as_ref().is_some_and(|(id, _)| *id == handle_id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some((_, span)) = span {
            if span.tracker().is_open(&span) {
                span.close(outcome, extra);
            }
        }
    }

    async fn take_worker(&self, handle_id: u64) -> Option<WorkerProcess> {
        let mut slot = self.shared.worker.lock().await;
        if slot.as_ref().is_some_and(|w| w.handle_id == handle_id) {
            slot.take()
        } else {
            None
        }
    }

    /// Starts a new worker and moves to STARTING.
    ///
    /// Allowed from UNSTARTED, from FAILED once the cooldown has passed, and
    /// from TERMINATED after [`re_enable`](Self::re_enable). A spawn failure
    /// moves straight to FAILED.
    pub async fn spawn(&self) -> Result<u32, SupervisorError> {
        self.spawn_with(None).await
    }

    /// Like [`spawn`](Self::spawn), with the readiness span opened as a child
    /// of `parent` while that span is still open.
    pub async fn spawn_under(&self, parent: &SpanHandle) -> Result<u32, SupervisorError> {
        self.spawn_with(Some(parent)).await
    }

    async fn spawn_with(&self, parent: Option<&SpanHandle>) -> Result<u32, SupervisorError> {
        let (handle_id, restart_count, transition) = {
            let mut handle = self.lock_handle();
            match handle.state {
                ProcessState::Unstarted => {}
                ProcessState::Failed => {
                    if let Some(until) = handle.cooldown_until {
                        let now = Instant::now();
                        if until > now {
                            return Err(SupervisorError::CoolingDown {
                                remaining: until - now,
                            });
                        }
                    }
                }
                ProcessState::Terminated if handle.re_enabled => {}
                state => {
                    return Err(SupervisorError::InvalidTransition {
                        operation: "spawn",
                        state,
                    })
                }
            }

            let previous = handle.state;
            let restart_count = handle.restart_count;
            let id = self.shared.next_handle_id.fetch_add(1, Ordering::SeqCst);
            *handle = ProcessHandle::new(id, restart_count);
            // Keep the old state so the event records where we came from.
            handle.state = previous;
            let transition = self.transition(&mut handle, ProcessState::Starting);
            (handle.id, handle.restart_count, transition)
        };

        let program = self.shared.command.display_name();
        self.publish(transition, Metadata::new().with("program", program.as_str()));

        let metadata = Metadata::new()
            .with("program", program.as_str())
            .with("handle_id", handle_id)
            .with("restart_count", restart_count);
        let span = match parent.filter(|parent| parent.tracker().is_open(parent)) {
            Some(parent) => parent.child(READINESS_SPAN, Category::Subprocess, metadata),
            None => self
                .shared
                .tracker
                .start_span(READINESS_SPAN, Category::Subprocess, metadata),
        };
        let stale = self.lock_span().replace((handle_id, span));
        if let Some((_, stale)) = stale {
            if stale.tracker().is_open(&stale) {
                stale.close(Outcome::Failure, Metadata::new().with("superseded", true));
            }
        }

        // A terminate that ran before the span was registered could not close it.
        if !self.is_current(handle_id, ProcessState::Starting) {
            self.close_readiness_span(
                handle_id,
                Outcome::Failure,
                Metadata::new().with("error", "terminated"),
            );
            return Err(SupervisorError::Terminated);
        }

        let mut child = match self.shared.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let error = SupervisorError::SpawnFailure {
                    program,
                    reason: e.to_string(),
                };
                warn!("Failed to spawn worker: {}", error);
                self.fail_handle(handle_id, &error).await;
                return Err(error);
            }
        };

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take();
        let lines = match child.stdout.take() {
            Some(stdout) => forward_lines(stdout, handle_id),
            None => mpsc::channel(1).1,
        };
        let mut worker = WorkerProcess {
            handle_id,
            child,
            stdin,
            lines,
        };

        let mut slot = self.shared.worker.lock().await;
        let current = {
            let mut handle = self.lock_handle();
            let current = handle.id == handle_id && handle.state == ProcessState::Starting;
            if current {
                handle.pid = Some(pid);
                handle.started_at = Some(Instant::now());
            }
            current
        };
        if !current {
            drop(slot);
            self.close_readiness_span(
                handle_id,
                Outcome::Failure,
                Metadata::new().with("error", "terminated"),
            );
            debug!(pid, handle_id, "Handle terminated during spawn, killing worker");
            termination::force_kill(&mut worker.child).await;
            return Err(SupervisorError::Terminated);
        }
        if let Some(mut stale) = slot.replace(worker) {
            warn!(handle_id = stale.handle_id, "Replacing a stale worker process");
            tokio::spawn(async move {
                termination::force_kill(&mut stale.child).await;
            });
        }
        drop(slot);

        info!(pid, handle_id, "Worker spawned: {}", program);
        self.shared.logger.info(
            "Worker process spawned",
            Metadata::new()
                .with("program", program)
                .with("pid", pid)
                .with("handle_id", handle_id),
        );
        Ok(pid)
    }

    /// Waits for the readiness signal of the STARTING worker.
    ///
    /// On timeout the worker is killed and the handle moves to FAILED. A
    /// not-ready handshake or an early exit fails the wait immediately.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), SupervisorError> {
        let handle_id = {
            let handle = self.lock_handle();
            if handle.state != ProcessState::Starting {
                return Err(SupervisorError::InvalidTransition {
                    operation: "wait_ready",
                    state: handle.state,
                });
            }
            handle.id
        };

        let shutdown = self.shutdown_token();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = tokio::time::interval(self.shared.config.readiness_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let error = SupervisorError::ReadinessTimeout { timeout };
                    warn!(handle_id, "Worker not ready after {:?}", timeout);
                    self.fail_handle(handle_id, &error).await;
                    return Err(error);
                }
                _ = shutdown.cancelled() => return Err(SupervisorError::Terminated),
            }

            match self.poll_readiness(handle_id, started).await {
                Readiness::Pending => {}
                Readiness::Ready => return self.mark_ready(handle_id, started),
                Readiness::Failed(error) => {
                    warn!(handle_id, "Worker failed readiness: {}", error);
                    self.fail_handle(handle_id, &error).await;
                    return Err(error);
                }
                Readiness::Gone => return Err(SupervisorError::Terminated),
            }
        }
    }

    async fn poll_readiness(&self, handle_id: u64, started: Instant) -> Readiness {
        if !self.is_current(handle_id, ProcessState::Starting) {
            return Readiness::Gone;
        }

        let mut slot = self.shared.worker.lock().await;
        let Some(worker) = slot.as_mut().filter(|w| w.handle_id == handle_id) else {
            // Spawn has not stored the child yet.
            return Readiness::Pending;
        };

        if self.shared.readiness == ReadinessProbe::Handshake {
            while let Ok(line) = worker.lines.try_recv() {
                match parse_handshake(&line) {
                    HandshakeLine::Ready => return Readiness::Ready,
                    HandshakeLine::NotReady(message) => {
                        return Readiness::Failed(SupervisorError::NotReady(message))
                    }
                    HandshakeLine::Ignored => debug!(handle_id, "Worker output: {}", line),
                }
            }
        }

        match worker.child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                return Readiness::Failed(SupervisorError::WorkerExited(status.to_string()))
            }
            Err(e) => return Readiness::Failed(SupervisorError::WorkerExited(e.to_string())),
        }

        if let ReadinessProbe::Liveness { settle } = self.shared.readiness {
            if started.elapsed() >= settle {
                return Readiness::Ready;
            }
        }
        Readiness::Pending
    }

    fn mark_ready(&self, handle_id: u64, started: Instant) -> Result<(), SupervisorError> {
        let transition = {
            let mut handle = self.lock_handle();
            if handle.id != handle_id {
                return Err(SupervisorError::Terminated);
            }
            let transition = self.transition(&mut handle, ProcessState::Ready);
            if transition.is_none() {
                return Err(SupervisorError::InvalidTransition {
                    operation: "wait_ready",
                    state: handle.state,
                });
            }
            handle.consecutive_misses = 0;
            transition
        };

        let waited_ms = started.elapsed().as_millis() as u64;
        self.close_readiness_span(
            handle_id,
            Outcome::Success,
            Metadata::new().with("waited_ms", waited_ms),
        );
        self.publish(transition, Metadata::new().with("waited_ms", waited_ms));
        Ok(())
    }

    /// Moves the handle to FAILED, closes its span and kills its process.
    async fn fail_handle(&self, handle_id: u64, error: &SupervisorError) {
        let transition = {
            let mut handle = self.lock_handle();
            if handle.id == handle_id {
                self.mark_failed(&mut handle)
            } else {
                None
            }
        };

        let outcome = match error {
            SupervisorError::ReadinessTimeout { .. } => Outcome::TimedOut,
            _ => Outcome::Failure,
        };
        self.close_readiness_span(
            handle_id,
            outcome,
            Metadata::new().with("error", error.as_label()),
        );

        let mut fields = Metadata::new()
            .with("reason", error.as_label())
            .with("error", error.to_string());
        if let Some(mut worker) = self.take_worker(handle_id).await {
            let result = termination::force_kill(&mut worker.child).await;
            fields.insert("termination", result.as_label());
        }
        self.publish(transition, fields);
    }

    /// Probes a READY or DEGRADED worker once and applies the result.
    ///
    /// When the miss limit is reached the worker is killed and a restart is
    /// scheduled in the background under the restart policy.
    pub async fn health_check(&self) -> HealthStatus {
        let status = self.check_health().await;
        if let HealthStatus::Failed { misses } = status {
            let supervisor = self.clone();
            tokio::spawn(async move {
                if let Err(e) = supervisor.recover(SupervisorError::HealthCheckMiss { misses }).await {
                    warn!("Worker recovery stopped: {}", e);
                }
            });
        }
        status
    }

    async fn check_health(&self) -> HealthStatus {
        let (handle_id, state) = {
            let handle = self.lock_handle();
            (handle.id, handle.state)
        };
        if !matches!(state, ProcessState::Ready | ProcessState::Degraded) {
            return HealthStatus::Skipped(state);
        }

        let passed = self.probe_health(handle_id).await;
        let max_misses = self.shared.config.health_check_max_misses;

        let (status, transition) = {
            let mut handle = self.lock_handle();
            if handle.id != handle_id
                || !matches!(handle.state, ProcessState::Ready | ProcessState::Degraded)
            {
                return HealthStatus::Skipped(handle.state);
            }
            handle.last_health_check_at = Some(Instant::now());

            if passed {
                handle.consecutive_misses = 0;
                if handle.state == ProcessState::Degraded {
                    (
                        HealthStatus::Recovered,
                        self.transition(&mut handle, ProcessState::Ready),
                    )
                } else {
                    (HealthStatus::Healthy, None)
                }
            } else {
                handle.consecutive_misses += 1;
                let misses = handle.consecutive_misses;
                if misses >= max_misses {
                    (HealthStatus::Failed { misses }, self.mark_failed(&mut handle))
                } else if handle.state == ProcessState::Ready {
                    (
                        HealthStatus::Missed { misses },
                        self.transition(&mut handle, ProcessState::Degraded),
                    )
                } else {
                    (HealthStatus::Missed { misses }, None)
                }
            }
        };

        match status {
            HealthStatus::Missed { misses } => {
                warn!(handle_id, misses, "Worker health check missed");
                self.shared.logger.warn(
                    "Worker health check missed",
                    Metadata::new()
                        .with("handle_id", handle_id)
                        .with("misses", misses)
                        .with("max_misses", max_misses),
                );
                self.publish(transition, Metadata::new().with("misses", misses));
            }
            HealthStatus::Failed { misses } => {
                let error = SupervisorError::HealthCheckMiss { misses };
                warn!(handle_id, "{}", error);
                let mut fields = Metadata::new()
                    .with("reason", error.as_label())
                    .with("error", error.to_string());
                if let Some(mut worker) = self.take_worker(handle_id).await {
                    let result = termination::force_kill(&mut worker.child).await;
                    fields.insert("termination", result.as_label());
                }
                self.publish(transition, fields);
            }
            HealthStatus::Recovered => self.publish(transition, Metadata::new()),
            HealthStatus::Healthy | HealthStatus::Skipped(_) => {}
        }
        status
    }

    async fn probe_health(&self, handle_id: u64) -> bool {
        let mut slot = self.shared.worker.lock().await;
        let Some(worker) = slot.as_mut().filter(|w| w.handle_id == handle_id) else {
            return false;
        };
        if !matches!(worker.child.try_wait(), Ok(None)) {
            return false;
        }

        match &self.shared.health {
            HealthProbe::Alive => {
                while worker.lines.try_recv().is_ok() {}
                true
            }
            HealthProbe::Ping { request, expect } => {
                tokio::time::timeout(self.shared.config.probe_timeout, ping(worker, request, expect))
                    .await
                    .unwrap_or(false)
            }
        }
    }

    /// Runs health checks every `health_check_interval` until the worker
    /// fails, is terminated, or the supervisor is dropped.
    pub fn start_health_monitor(&self) {
        let token = self.shutdown_token().child_token();
        if let Some(previous) = self.lock_monitor().replace(token.clone()) {
            previous.cancel();
        }

        let shared = Arc::downgrade(&self.shared);
        let interval = self.shared.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let supervisor = ProcessSupervisor { shared };

                match supervisor.health_check().await {
                    HealthStatus::Failed { .. } => return,
                    HealthStatus::Skipped(state) => {
                        debug!(%state, "Health monitor stopping");
                        return;
                    }
                    _ => {}
                }
            }
        });
    }

    /// Spawns the worker and waits for readiness, restarting with backoff
    /// until it is READY or the restart budget is spent. Starts the health
    /// monitor once the worker is READY.
    pub async fn launch(&self) -> Result<u32, SupervisorError> {
        self.launch_with(None).await
    }

    /// Like [`launch`](Self::launch), with every readiness span opened as a
    /// child of `parent`.
    pub async fn launch_under(&self, parent: &SpanHandle) -> Result<u32, SupervisorError> {
        self.launch_with(Some(parent)).await
    }

    async fn launch_with(&self, parent: Option<&SpanHandle>) -> Result<u32, SupervisorError> {
        loop {
            match self.start_once(parent).await {
                Ok(pid) => {
                    self.start_health_monitor();
                    return Ok(pid);
                }
                Err(error) if error.is_retryable() => self.schedule_restart(&error).await?,
                Err(error) => return Err(error),
            }
        }
    }

    async fn start_once(&self, parent: Option<&SpanHandle>) -> Result<u32, SupervisorError> {
        let pid = self.spawn_with(parent).await?;
        self.wait_ready(self.shared.config.readiness_timeout).await?;
        Ok(pid)
    }

    async fn recover(&self, cause: SupervisorError) -> Result<u32, SupervisorError> {
        self.schedule_restart(&cause).await?;
        self.launch().await
    }

    /// Sleeps out the backoff delay for the next restart of a FAILED worker.
    async fn schedule_restart(&self, cause: &SupervisorError) -> Result<(), SupervisorError> {
        let (handle_id, attempt) = {
            let handle = self.lock_handle();
            if handle.state != ProcessState::Failed {
                return Err(SupervisorError::Terminated);
            }
            (handle.id, handle.restart_count)
        };

        let max_attempts = self.shared.config.max_restart_attempts;
        if attempt >= max_attempts {
            let error = SupervisorError::RestartsExhausted { attempts: attempt };
            warn!("{}", error);
            self.shared.logger.event(
                Severity::Bottleneck,
                "Worker failed permanently",
                Metadata::new()
                    .with("handle_id", handle_id)
                    .with("restart_count", attempt)
                    .with("reason", cause.as_label())
                    .with("error", cause.to_string()),
            );
            return Err(error);
        }

        let delay = self.shared.config.backoff.next(attempt);
        info!(attempt = attempt + 1, ?delay, "Scheduling worker restart");
        self.shared.logger.warn(
            "Worker restart scheduled",
            Metadata::new()
                .with("handle_id", handle_id)
                .with("attempt", attempt + 1)
                .with("max_attempts", max_attempts)
                .with("delay_ms", delay.as_millis() as u64)
                .with("reason", cause.as_label()),
        );

        let shutdown = self.shutdown_token();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return Err(SupervisorError::Terminated),
        }

        let mut handle = self.lock_handle();
        if handle.id != handle_id || handle.state != ProcessState::Failed {
            return Err(SupervisorError::Terminated);
        }
        handle.restart_count += 1;
        handle.cooldown_until = None;
        Ok(())
    }

    /// Stops the worker (SIGTERM, grace period, SIGKILL) and moves to
    /// TERMINATED. Safe to call repeatedly and from any state; pending
    /// readiness waits, restarts and health monitoring stop.
    pub async fn terminate(&self) -> TerminationResult {
        let (handle_id, transition) = {
            let mut handle = self.lock_handle();
            if handle.state == ProcessState::Terminated {
                return TerminationResult::NotRunning;
            }
            handle.re_enabled = false;
            let transition = self.transition(&mut handle, ProcessState::Terminated);
            (handle.id, transition)
        };

        self.shutdown_token().cancel();
        if let Some(monitor) = self.lock_monitor().take() {
            monitor.cancel();
        }
        self.close_readiness_span(
            handle_id,
            Outcome::Failure,
            Metadata::new().with("error", "terminated"),
        );

        let worker = self.shared.worker.lock().await.take();
        let result = match worker {
            Some(mut worker) => {
                termination::shutdown_child(&mut worker.child, self.shared.config.termination_grace)
                    .await
            }
            None => TerminationResult::NotRunning,
        };

        self.publish(
            transition,
            Metadata::new().with("termination", result.as_label()),
        );
        result
    }

    /// Allows a TERMINATED supervisor to spawn again, with a fresh restart budget.
    pub fn re_enable(&self) -> Result<(), SupervisorError> {
        let mut handle = self.lock_handle();
        if handle.state != ProcessState::Terminated {
            return Err(SupervisorError::InvalidTransition {
                operation: "re_enable",
                state: handle.state,
            });
        }
        handle.re_enabled = true;
        handle.restart_count = 0;
        *self
            .shared
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = CancellationToken::new();
        Ok(())
    }
}

fn forward_lines(stdout: ChildStdout, handle_id: u64) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match tx.try_send(line) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!(handle_id, "Worker output buffer full, dropping line")
                    }
                    Err(TrySendError::Closed(_)) => break,
                },
                Ok(None) => break,
                Err(e) => {
                    debug!(handle_id, "Stopped reading worker stdout: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

async fn ping(worker: &mut WorkerProcess, request: &str, expect: &str) -> bool {
    while worker.lines.try_recv().is_ok() {}

    let Some(stdin) = worker.stdin.as_mut() else {
        return false;
    };
    let mut payload = request.to_string();
    if !payload.ends_with('\n') {
        payload.push('\n');
    }
    if stdin.write_all(payload.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
        return false;
    }

    while let Some(line) = worker.lines.recv().await {
        if line.contains(expect) {
            return true;
        }
    }
    false
}

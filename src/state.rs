//! Process-wide run state and cooperative run control.
//!
//! [`RunState`] is the single owner of counts, status and the log buffer.
//! Workers never touch its fields directly: every mutation is one
//! [`StateChange`] applied under one lock, and readers take a
//! [`StateSnapshot`]. Observers are notified after the lock is released,
//! so a callback may safely take its own snapshot.
//!
//! [`RunControl`] carries the stop token and the pause flag into every
//! suspension point of a run.

use crate::observer::RunObserver;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle of a run. `watching` is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

impl RunStatus {
    /// Running or paused: a batch owns the pipeline.
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One dashboard log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
}

/// Point-in-time copy of [`RunState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub status: RunStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub current_label: Option<String>,
    pub elapsed_secs: u64,
    /// Completed rows per minute since the current pass started.
    pub rate_per_minute: f64,
    pub watching: bool,
    pub retry_attempt: u32,
    pub max_retries: u32,
    pub identities: usize,
    /// Distinct recipient names completed by this process.
    pub processed_count: usize,
}

impl StateSnapshot {
    /// Rows finished either way in the current pass.
    pub fn done(&self) -> usize {
        self.completed + self.failed
    }
}

/// An atomic delta on [`RunState`].
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Status(RunStatus),
    /// A new run: zero the retry counter and record the bound.
    StartRun { max_retries: u32 },
    /// A new pass over `total` rows: zero the counts and restart the clock.
    BeginPass { total: usize },
    RetryAttempt(u32),
    CurrentLabel(Option<String>),
    /// A row finished; `key` is its name's comparison key.
    RowCompleted { key: Option<String> },
    RowFailed,
    Watching(bool),
    Identities(usize),
}

#[derive(Debug)]
struct Inner {
    status: RunStatus,
    total: usize,
    completed: usize,
    failed: usize,
    current_label: Option<String>,
    started_at: Option<Instant>,
    retry_attempt: u32,
    max_retries: u32,
    watching: bool,
    identities: usize,
    processed: HashSet<String>,
    logs: VecDeque<LogEntry>,
    log_capacity: usize,
}

impl Inner {
    fn apply(&mut self, change: StateChange) {
        match change {
            StateChange::Status(status) => self.status = status,
            StateChange::StartRun { max_retries } => {
                // A pause issued right after the claim still holds.
                if self.status != RunStatus::Paused {
                    self.status = RunStatus::Running;
                }
                self.retry_attempt = 0;
                self.max_retries = max_retries;
                self.total = 0;
                self.completed = 0;
                self.failed = 0;
                self.current_label = None;
                self.started_at = Some(Instant::now());
            }
            StateChange::BeginPass { total } => {
                self.total = total;
                self.completed = 0;
                self.failed = 0;
                self.current_label = None;
                self.started_at = Some(Instant::now());
            }
            StateChange::RetryAttempt(n) => self.retry_attempt = n,
            StateChange::CurrentLabel(label) => self.current_label = label,
            StateChange::RowCompleted { key } => {
                self.completed += 1;
                if let Some(key) = key {
                    self.processed.insert(key);
                }
            }
            StateChange::RowFailed => self.failed += 1,
            StateChange::Watching(on) => self.watching = on,
            StateChange::Identities(n) => self.identities = n,
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let minutes = elapsed.as_secs_f64() / 60.0;
        let rate_per_minute = if minutes > 0.0 {
            self.completed as f64 / minutes
        } else {
            0.0
        };
        StateSnapshot {
            status: self.status,
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            current_label: self.current_label.clone(),
            elapsed_secs: elapsed.as_secs(),
            rate_per_minute,
            watching: self.watching,
            retry_attempt: self.retry_attempt,
            max_retries: self.max_retries,
            identities: self.identities,
            processed_count: self.processed.len(),
        }
    }
}

/// Shared, lock-guarded run state.
pub struct RunState {
    inner: Mutex<Inner>,
    observer: Arc<dyn RunObserver>,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl RunState {
    pub fn new(log_capacity: usize, observer: Arc<dyn RunObserver>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: RunStatus::Idle,
                total: 0,
                completed: 0,
                failed: 0,
                current_label: None,
                started_at: None,
                retry_attempt: 0,
                max_retries: 0,
                watching: false,
                identities: 0,
                processed: HashSet::new(),
                logs: VecDeque::with_capacity(log_capacity.min(1024)),
                log_capacity: log_capacity.max(1),
            }),
            observer,
        }
    }

    /// Apply one change and notify the observer with the resulting snapshot.
    pub fn apply(&self, change: StateChange) -> StateSnapshot {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.apply(change);
            inner.snapshot()
        };
        self.observer.on_state(&snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn status(&self) -> RunStatus {
        self.inner.lock().status
    }

    /// Move to `Running` unless a run is already active. The check and the
    /// transition happen under one lock, so only one caller can win.
    pub fn try_claim(&self) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.status.is_active() {
                return false;
            }
            inner.status = RunStatus::Running;
            inner.snapshot()
        };
        self.observer.on_state(&snapshot);
        true
    }

    /// Swap `Running` and `Paused`; any other status is left alone.
    pub fn toggle_pause(&self) -> RunStatus {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.status = match inner.status {
                RunStatus::Running => RunStatus::Paused,
                RunStatus::Paused => RunStatus::Running,
                other => return other,
            };
            inner.snapshot()
        };
        self.observer.on_state(&snapshot);
        snapshot.status
    }

    /// Whether a name with this comparison key was already completed.
    pub fn was_processed(&self, key: &str) -> bool {
        self.inner.lock().processed.contains(key)
    }

    /// Change the retained log size, dropping the oldest entries if needed.
    pub fn set_log_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.log_capacity = capacity.max(1);
        while inner.logs.len() > inner.log_capacity {
            inner.logs.pop_front();
        }
    }

    /// Append a log entry, dropping the oldest beyond capacity.
    ///
    /// The entry is also emitted as a `tracing` event.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
            level,
        };
        match level {
            LogLevel::Info | LogLevel::Success => info!("{}", entry.message),
            LogLevel::Warning => warn!("{}", entry.message),
            LogLevel::Error => error!("{}", entry.message),
        }
        {
            let mut inner = self.inner.lock();
            if inner.logs.len() >= inner.log_capacity {
                inner.logs.pop_front();
            }
            inner.logs.push_back(entry.clone());
        }
        self.observer.on_log(&entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// The last `n` log entries, oldest first.
    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        let skip = inner.logs.len().saturating_sub(n);
        inner.logs.iter().skip(skip).cloned().collect()
    }
}

// ── Run control ──────────────────────────────────────────────────────────

/// The run was stopped while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run stopped")]
pub struct Cancelled;

/// Stop and pause signals for one run.
///
/// A fresh control is created for every run; stopping is permanent for the
/// run it belongs to. Clones share the same signals.
#[derive(Debug, Clone)]
pub struct RunControl {
    stop: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            stop: CancellationToken::new(),
            pause: Arc::new(tx),
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
        // Wake anyone parked on the pause flag.
        self.pause.send_replace(false);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.send_replace(paused);
    }

    /// Block while paused. Returns `Err(Cancelled)` as soon as the run is
    /// stopped, whether or not it was paused.
    pub async fn wait_while_paused(&self) -> Result<(), Cancelled> {
        let mut rx = self.pause.subscribe();
        loop {
            if self.stop.is_cancelled() {
                return Err(Cancelled);
            }
            if !*rx.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.stop.cancelled() => return Err(Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep for `duration` unless stopped first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        cancellable_sleep(&self.stop, duration).await
    }
}

/// Sleep that returns early with `Err(Cancelled)` when `token` fires.
pub async fn cancellable_sleep(
    token: &CancellationToken,
    duration: Duration,
) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        return Err(Cancelled);
    }
    tokio::select! {
        _ = token.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;

    fn state(capacity: usize) -> RunState {
        RunState::new(capacity, Arc::new(NoopObserver))
    }

    #[test]
    fn log_buffer_drops_oldest() {
        let s = state(3);
        for i in 0..5 {
            s.info(format!("line {i}"));
        }
        let logs = s.recent_logs(10);
        let messages: Vec<_> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["line 2", "line 3", "line 4"]);
        assert_eq!(s.recent_logs(1)[0].message, "line 4");
    }

    #[test]
    fn begin_pass_resets_counts_but_not_retry() {
        let s = state(10);
        s.apply(StateChange::StartRun { max_retries: 2 });
        s.apply(StateChange::BeginPass { total: 4 });
        s.apply(StateChange::RowFailed);
        s.apply(StateChange::RowCompleted {
            key: Some("احمد".into()),
        });
        s.apply(StateChange::RetryAttempt(1));
        let snap = s.apply(StateChange::BeginPass { total: 1 });
        assert_eq!((snap.total, snap.completed, snap.failed), (1, 0, 0));
        assert_eq!(snap.retry_attempt, 1);
        assert_eq!(snap.max_retries, 2);
        assert_eq!(snap.processed_count, 1);
        assert!(s.was_processed("احمد"));
    }

    #[test]
    fn watching_is_orthogonal_to_status() {
        let s = state(10);
        s.apply(StateChange::Watching(true));
        let snap = s.apply(StateChange::Status(RunStatus::Completed));
        assert!(snap.watching);
        assert_eq!(snap.status, RunStatus::Completed);
    }

    #[test]
    fn claim_is_exclusive() {
        let s = state(10);
        assert!(s.try_claim());
        assert!(!s.try_claim());
        assert_eq!(s.toggle_pause(), RunStatus::Paused);
        assert!(!s.try_claim());
        assert_eq!(s.toggle_pause(), RunStatus::Running);
        s.apply(StateChange::Status(RunStatus::Completed));
        assert_eq!(s.toggle_pause(), RunStatus::Completed);
        assert!(s.try_claim());
    }

    #[tokio::test]
    async fn pause_then_resume_unblocks() {
        let control = RunControl::new();
        control.set_paused(true);
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        control.set_paused(false);
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn stop_interrupts_pause() {
        let control = RunControl::new();
        control.set_paused(true);
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        control.stop();
        assert_eq!(waiter.await.unwrap(), Err(Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interruptible() {
        let control = RunControl::new();
        let started = Instant::now();
        let sleeper = {
            let control = control.clone();
            tokio::spawn(async move { control.sleep(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        control.stop();
        assert_eq!(sleeper.await.unwrap(), Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}

//! Outbound event hooks: log entries and state snapshots.
//!
//! Inject an [`Arc<dyn RunObserver>`] when building a
//! [`crate::generator::Generator`] to receive events as a run progresses.
//! The trait is `Send + Sync` because workers emit from concurrent tasks.
//!
//! # Example
//!
//! ```rust
//! use certbatch::observer::RunObserver;
//! use certbatch::state::{LogEntry, StateSnapshot};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingObserver {
//!     logs: AtomicUsize,
//! }
//!
//! impl RunObserver for CountingObserver {
//!     fn on_log(&self, entry: &LogEntry) {
//!         self.logs.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{:?}] {}", entry.level, entry.message);
//!     }
//! }
//! ```

use crate::state::{LogEntry, StateSnapshot};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Receives run events. Both methods default to no-ops.
///
/// Called outside the state lock, possibly from several worker tasks at
/// once; implementations must synchronise their own state.
pub trait RunObserver: Send + Sync {
    fn on_log(&self, entry: &LogEntry) {
        let _ = entry;
    }

    /// Called after every state change.
    fn on_state(&self, snapshot: &StateSnapshot) {
        let _ = snapshot;
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Event forwarded by [`BroadcastObserver`].
#[derive(Debug, Clone)]
pub enum RunEvent {
    Log(LogEntry),
    State(StateSnapshot),
}

/// Fans events out to any number of subscribers, e.g. dashboard sockets.
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// workers.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<RunEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`; lagged gaps surface as `Err` items.
    pub fn stream(&self) -> BroadcastStream<RunEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl RunObserver for BroadcastObserver {
    fn on_log(&self, entry: &LogEntry) {
        // No subscribers is not an error.
        let _ = self.tx.send(RunEvent::Log(entry.clone()));
    }

    fn on_state(&self, snapshot: &StateSnapshot) {
        let _ = self.tx.send(RunEvent::State(snapshot.clone()));
    }
}

/// Convenience alias for the shared observer handle.
pub type SharedObserver = Arc<dyn RunObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RunState, StateChange};
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn broadcast_stream_sees_logs_and_state() {
        let observer = BroadcastObserver::new(16);
        let mut events = observer.stream();
        let state = RunState::new(10, Arc::new(observer.clone()));

        state.info("hello");
        state.apply(StateChange::BeginPass { total: 3 });

        match events.next().await {
            Some(Ok(RunEvent::Log(entry))) => assert_eq!(entry.message, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
        match events.next().await {
            Some(Ok(RunEvent::State(snap))) => assert_eq!(snap.total, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn send_without_subscribers_is_fine() {
        let observer = BroadcastObserver::new(1);
        let state = RunState::new(10, Arc::new(observer));
        state.warning("nobody listening");
        assert_eq!(state.recent_logs(1).len(), 1);
    }
}

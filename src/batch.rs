//! Batch coordinator: one full run, including bounded retry passes.
//!
//! A run never returns an error. Configuration problems, a missing
//! identity pool and sheet read failures all end as a status change plus a
//! log entry, so the caller (the generator or the watch loop) keeps going.
//!
//! ## Known gap
//!
//! Writes are not transactional. If the process dies between a successful
//! upload and the link write-back, the uploaded file stays without a link
//! and the row is processed again on the next scan. Delivery is
//! at-least-once.

use crate::config::GeneratorConfig;
use crate::identity::IdentityPool;
use crate::normalize::NameNormalizer;
use crate::pipeline::distribute::distribute;
use crate::pipeline::limiter::RateLimiter;
use crate::pipeline::scan::{scan_pending, Row};
use crate::pipeline::worker::{run_worker, RowOutcome, WorkerContext};
use crate::services::{ServiceSession, SessionFactory};
use crate::state::{RunControl, RunState, RunStatus, StateChange};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Everything a run needs.
#[derive(Clone)]
pub struct BatchContext {
    pub config: Arc<GeneratorConfig>,
    pub identities: IdentityPool,
    pub factory: Arc<dyn SessionFactory>,
    pub state: Arc<RunState>,
    pub control: RunControl,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Passes executed, the first one included.
    pub passes: u32,
    /// Rows completed over all passes.
    pub completed: usize,
    /// Rows still failing after the last pass.
    pub failed: usize,
    pub stopped: bool,
    /// Every row outcome, in pass order.
    pub outcomes: Vec<RowOutcome>,
}

/// An identity's index with its open session.
pub type WorkerSession = (usize, ServiceSession);

/// Open one session per identity. Identities that fail to open are logged
/// and left out.
pub async fn open_sessions(
    factory: &dyn SessionFactory,
    identities: &IdentityPool,
    state: &RunState,
) -> Vec<WorkerSession> {
    let mut sessions = Vec::with_capacity(identities.len());
    for identity in identities.iter() {
        match factory.open(identity).await {
            Ok(session) => sessions.push((identity.index(), session)),
            Err(e) => state.error(format!("Identity {}: {}", identity.label(), e)),
        }
    }
    sessions
}

/// Scan for pending rows; a read failure is logged and yields no rows.
pub async fn scan_or_empty(
    session: &ServiceSession,
    config: &GeneratorConfig,
    normalizer: &NameNormalizer,
    state: &RunState,
) -> Vec<Row> {
    match scan_pending(session.sheets.as_ref(), config, normalizer).await {
        Ok(rows) => rows,
        Err(e) => {
            state.error(format!("Error reading sheet: {e}"));
            Vec::new()
        }
    }
}

/// Execute a full run: first pass, then retry passes while rows fail.
///
/// Ends `Completed`, or `Idle` when stopped or unable to start.
pub async fn run_batch(ctx: BatchContext) -> BatchReport {
    let BatchContext {
        config,
        identities,
        factory,
        state,
        control,
    } = ctx;
    let mut report = BatchReport::default();

    state.info("Starting certificate generation");

    // ── Step 1: Check preconditions ──────────────────────────────────────
    if identities.is_empty() {
        state.error("Cannot start: no worker identities loaded");
        state.apply(StateChange::Status(RunStatus::Idle));
        return report;
    }
    if let Err(e) = config.validate_for_run() {
        state.error(format!("Cannot start: {e}"));
        state.apply(StateChange::Status(RunStatus::Idle));
        return report;
    }
    state.apply(StateChange::StartRun {
        max_retries: config.max_retries,
    });

    // ── Step 2: Open sessions ────────────────────────────────────────────
    let sessions = open_sessions(factory.as_ref(), &identities, &state).await;
    let Some((_, scanner)) = sessions.first().cloned() else {
        state.error("Cannot start: no identity could open a session");
        state.apply(StateChange::Status(RunStatus::Idle));
        return report;
    };
    let normalizer = Arc::new(NameNormalizer::new(&config.cleanup));
    let worker_ctx = WorkerContext {
        config: Arc::clone(&config),
        normalizer: Arc::clone(&normalizer),
        state: Arc::clone(&state),
        control: control.clone(),
    };

    // ── Step 3: First pass ───────────────────────────────────────────────
    state.info("Reading spreadsheet");
    let rows = scan_or_empty(&scanner, &config, &normalizer, &state).await;
    state.info(format!("{} certificates to generate", rows.len()));
    if rows.is_empty() {
        state.success("No pending certificates");
        return finish(&state, &control, report);
    }

    let started = Instant::now();
    let outcomes = run_pass(&worker_ctx, &sessions, rows).await;
    report.absorb(outcomes);
    let snap = state.snapshot();
    let minutes = started.elapsed().as_secs_f64() / 60.0;
    let rate = if minutes > 0.0 {
        snap.completed as f64 / minutes
    } else {
        0.0
    };
    state.success(format!(
        "Batch completed: {} certificates in {:.1} minutes ({:.0}/min)",
        snap.completed, minutes, rate
    ));

    // ── Step 4: Retry passes ─────────────────────────────────────────────
    loop {
        let snap = state.snapshot();
        if snap.failed == 0 || control.is_stopped() {
            break;
        }
        if snap.retry_attempt >= config.max_retries {
            state.warning(format!(
                "Reached maximum retry attempts ({})",
                config.max_retries
            ));
            break;
        }
        state.warning(format!(
            "{} certificates failed, preparing to retry",
            snap.failed
        ));
        if control.sleep(config.retry_delay()).await.is_err() {
            break;
        }

        let attempt = snap.retry_attempt + 1;
        state.apply(StateChange::RetryAttempt(attempt));
        state.info(format!(
            "Starting retry attempt {}/{}",
            attempt, config.max_retries
        ));
        let rows = scan_or_empty(&scanner, &config, &normalizer, &state).await;
        if rows.is_empty() {
            state.success("No pending certificates to retry");
            state.apply(StateChange::BeginPass { total: 0 });
            break;
        }
        state.info(format!("Found {} certificates to retry", rows.len()));
        let outcomes = run_pass(&worker_ctx, &sessions, rows).await;
        report.absorb(outcomes);
        let snap = state.snapshot();
        state.success(format!(
            "Retry completed. Completed: {}, failed: {}",
            snap.completed, snap.failed
        ));
    }

    finish(&state, &control, report)
}

fn finish(state: &RunState, control: &RunControl, mut report: BatchReport) -> BatchReport {
    let snap = state.snapshot();
    report.failed = snap.failed;
    report.stopped = control.is_stopped();
    let status = if report.stopped {
        RunStatus::Idle
    } else {
        RunStatus::Completed
    };
    state.apply(StateChange::CurrentLabel(None));
    state.apply(StateChange::Status(status));
    info!(
        "Run finished: {} completed, {} failed, {} passes",
        report.completed, report.failed, report.passes
    );
    report
}

/// One pass: distribute `rows` and run one worker task per non-empty bucket.
async fn run_pass(
    ctx: &WorkerContext,
    sessions: &[WorkerSession],
    rows: Vec<Row>,
) -> Vec<RowOutcome> {
    ctx.state.apply(StateChange::BeginPass { total: rows.len() });
    let buckets = distribute(rows, sessions.len());

    let handles: Vec<_> = sessions
        .iter()
        .zip(buckets)
        .filter(|(_, bucket)| !bucket.is_empty())
        .map(|((worker, session), bucket)| {
            ctx.state
                .info(format!("Worker {}: {} items", worker, bucket.len()));
            let limiter = RateLimiter::new(ctx.config.calls_per_minute);
            tokio::spawn(run_worker(
                ctx.clone(),
                *worker,
                session.clone(),
                bucket,
                limiter,
            ))
        })
        .collect();
    debug!("Spawned {} workers", handles.len());

    let mut outcomes = Vec::new();
    for joined in join_all(handles).await {
        match joined {
            Ok(worker_outcomes) => outcomes.extend(worker_outcomes),
            Err(e) => ctx.state.error(format!("Worker task failed: {e}")),
        }
    }
    outcomes
}

impl BatchReport {
    fn absorb(&mut self, outcomes: Vec<RowOutcome>) {
        self.passes += 1;
        self.completed += outcomes.iter().filter(|o| o.is_completed()).count();
        self.outcomes.extend(outcomes);
    }
}

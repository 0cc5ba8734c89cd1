//! Certificate worker: processes one identity's bucket of rows in order.
//!
//! Concurrency comes from running one worker per identity; inside a worker
//! rows are strictly sequential. A row's failure is recorded and the worker
//! moves on. The stop signal is checked at each row boundary, during a
//! pause and during a rate-limit wait, never in the middle of a row's
//! remote calls.

use crate::config::GeneratorConfig;
use crate::error::RowError;
use crate::normalize::{comparison_key, NameNormalizer};
use crate::pipeline::limiter::RateLimiter;
use crate::pipeline::render::{render_row, CleanupOutcome};
use crate::pipeline::scan::Row;
use crate::services::ServiceSession;
use crate::state::{Cancelled, RunControl, RunState, StateChange};
use std::sync::Arc;
use tracing::debug;

/// Result of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Completed {
        position: usize,
        label: String,
        link: String,
    },
    Failed(RowError),
}

impl RowOutcome {
    pub fn position(&self) -> usize {
        match self {
            RowOutcome::Completed { position, .. } => *position,
            RowOutcome::Failed(e) => e.position(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RowOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RowOutcome::Failed(RowError::Cancelled { .. }))
    }
}

/// Shared inputs of every worker in a pass.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub config: Arc<GeneratorConfig>,
    pub normalizer: Arc<NameNormalizer>,
    pub state: Arc<RunState>,
    pub control: RunControl,
}

/// Process `rows` in order with `session`, throttled by `limiter`.
///
/// Stops at the first row boundary after the run is stopped; the row that
/// was about to start is reported as [`RowError::Cancelled`] and is not
/// counted as failed.
pub async fn run_worker(
    ctx: WorkerContext,
    worker: usize,
    session: ServiceSession,
    rows: Vec<Row>,
    mut limiter: RateLimiter,
) -> Vec<RowOutcome> {
    let mut outcomes = Vec::with_capacity(rows.len());
    for row in rows {
        let position = row.position;
        if wait_for_slot(&ctx, worker, &mut limiter).await.is_err() {
            debug!("Worker {}: stopped before row {}", worker, position);
            outcomes.push(RowOutcome::Failed(RowError::Cancelled { position }));
            break;
        }

        outcomes.push(process_row(&ctx, &session, &row).await);
    }
    outcomes
}

/// Suspension points before a row: stop check, pause, rate limit.
async fn wait_for_slot(
    ctx: &WorkerContext,
    worker: usize,
    limiter: &mut RateLimiter,
) -> Result<(), Cancelled> {
    if ctx.control.is_stopped() {
        return Err(Cancelled);
    }
    ctx.control.wait_while_paused().await?;
    let waited = limiter.acquire(ctx.control.token()).await?;
    if !waited.is_zero() {
        ctx.state.warning(format!(
            "Worker {worker}: rate limit, waited {:.0}s",
            waited.as_secs_f64()
        ));
    }
    Ok(())
}

async fn process_row(ctx: &WorkerContext, session: &ServiceSession, row: &Row) -> RowOutcome {
    let config = ctx.config.as_ref();
    let label = row.label();
    ctx.state.apply(StateChange::CurrentLabel(Some(label.clone())));

    let result = match render_row(session, config, &ctx.normalizer, row, &label).await {
        Ok(rendered) => {
            match &rendered.cleanup {
                CleanupOutcome::Deleted { .. } => {}
                CleanupOutcome::Trashed => ctx
                    .state
                    .warning(format!("{label}: working copy moved to trash")),
                CleanupOutcome::Leaked { detail, .. } => ctx.state.warning(format!(
                    "{label}: could not delete working copy: {}",
                    crate::error::truncate_reason(detail)
                )),
            }
            let link = rendered.uploaded.link;
            write_link(session, config, row.position, &link)
                .await
                .map(|()| link)
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(link) => {
            let key = (!row.resolved_name.is_empty()).then(|| comparison_key(&row.resolved_name));
            let snap = ctx.state.apply(StateChange::RowCompleted { key });
            ctx.state
                .success(format!("[{}/{}] {}", snap.done(), snap.total, label));
            RowOutcome::Completed {
                position: row.position,
                label,
                link,
            }
        }
        Err(e) => {
            ctx.state.apply(StateChange::RowFailed);
            ctx.state.error(format!(
                "Row {} ({}): {}",
                row.position,
                label,
                e.short_reason()
            ));
            RowOutcome::Failed(e)
        }
    }
}

async fn write_link(
    session: &ServiceSession,
    config: &GeneratorConfig,
    position: usize,
    link: &str,
) -> Result<(), RowError> {
    let source = config.source.as_deref().unwrap_or_default();
    session
        .sheets
        .write_cell(source, position, config.link_column(), link)
        .await
        .map_err(|e| RowError::WriteBack {
            position,
            detail: e.to_string(),
        })
}

//! Watch mode: poll the sheet and start a batch when new rows appear.
//!
//! The loop only scans while no batch is running or paused, and a scan that
//! fails counts as "nothing new". The wait between polls ends as soon as
//! watch mode is disabled.

use crate::batch::scan_or_empty;
use crate::error::CertError;
use crate::generator::Generator;
use crate::normalize::{comparison_key, NameNormalizer};
use crate::state::cancellable_sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run until `token` is cancelled.
pub async fn watch_loop(generator: Generator, token: CancellationToken) {
    let state = generator.state().clone();
    state.info(format!(
        "Auto-watch started, checking every {}s",
        generator.config().watch_interval_secs
    ));

    while !token.is_cancelled() {
        if !state.status().is_active() {
            tick(&generator, &token).await;
        }
        let interval = generator.config().watch_interval();
        if cancellable_sleep(&token, interval).await.is_err() {
            break;
        }
    }

    state.warning("Auto-watch stopped");
}

/// One poll: scan, and run a batch if anything is pending.
async fn tick(generator: &Generator, token: &CancellationToken) {
    let state = generator.state();
    let config = generator.config();
    let session = match generator.session().await {
        Ok(session) => session,
        Err(e) => {
            debug!("Watch: no session: {}", e);
            return;
        }
    };
    let normalizer = NameNormalizer::new(&config.cleanup);
    let rows = scan_or_empty(&session, &config, &normalizer, state).await;
    if rows.is_empty() {
        debug!("Watch: nothing pending");
        return;
    }

    state.info(format!("Found {} new entries", rows.len()));
    let seen = rows
        .iter()
        .filter(|row| state.was_processed(&comparison_key(&row.resolved_name)))
        .count();
    if seen > 0 {
        state.warning(format!(
            "{seen} of them carry a name already processed in this session"
        ));
    }

    match generator.start() {
        Ok(handle) => {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = handle => {}
            }
        }
        Err(CertError::AlreadyRunning) => debug!("Watch: batch already running"),
        Err(e) => state.error(e.to_string()),
    }
}

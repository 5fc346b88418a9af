//! Background cleanup: prune the replay cache, report stale registration tokens.

use crate::error::ServerResult;
use crate::registration::count_expired_tokens;
use crate::server::AppState;
use std::time::Duration;
use tokio::time;

pub fn spawn_cleanup_task(state: AppState) {
    let period = Duration::from_secs(state.config.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = run_cleanup(&state, chrono::Utc::now().timestamp()) {
                tracing::error!("Cleanup error: {}", e);
            }
        }
    });
}

/// One cleanup pass. Returns the number of nonces pruned.
pub fn run_cleanup(state: &AppState, now: i64) -> ServerResult<usize> {
    let pruned = state.verifier.replay_cache().prune(now)?;

    let expired = {
        let conn = state.storage.conn()?;
        count_expired_tokens(&conn, now)?
    };

    tracing::debug!(
        "Cleanup completed: {} nonces pruned, {} registration tokens expired unused",
        pruned,
        expired
    );
    Ok(pruned)
}

//! Per-employee replay cache.

use crate::error::{ServerError, ServerResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Seen nonces per employee, each kept until its envelope could no longer
/// pass the freshness check.
#[derive(Clone)]
pub struct ReplayCache {
    // employee -> nonce -> expires_at
    seen: Arc<Mutex<HashMap<Uuid, HashMap<String, i64>>>>,
    window_secs: i64,
}

impl ReplayCache {
    pub fn new(window_secs: i64) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashMap::new())),
            window_secs,
        }
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Record `nonce` for `employee_id`, failing if it was already seen.
    ///
    /// Check and insert happen under one lock, so of two concurrent requests
    /// carrying the same nonce exactly one passes.
    pub fn check_and_insert(
        &self,
        employee_id: &Uuid,
        nonce: &str,
        timestamp: i64,
        now: i64,
    ) -> ServerResult<()> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock error: {}", e)))?;

        let nonces = seen.entry(*employee_id).or_default();
        nonces.retain(|_, expires_at| *expires_at >= now);

        if nonces.contains_key(nonce) {
            return Err(ServerError::ReplayDetected(format!(
                "nonce reused by {}",
                employee_id
            )));
        }

        let expires_at = timestamp.max(now).saturating_add(self.window_secs);
        nonces.insert(nonce.to_string(), expires_at);
        Ok(())
    }

    /// Drop expired entries. Returns how many nonces were removed.
    pub fn prune(&self, now: i64) -> ServerResult<usize> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock error: {}", e)))?;

        let mut removed = 0;
        seen.retain(|_, nonces| {
            let before = nonces.len();
            nonces.retain(|_, expires_at| *expires_at >= now);
            removed += before - nonces.len();
            !nonces.is_empty()
        });
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .map(|seen| seen.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

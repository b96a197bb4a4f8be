//! Session-chaining reconciler: a background task that assigns a shared
//! `session_id` to headers that never received one on the live path.
//!
//! Grounded on the teacher's `hot_reload_manager.rs` periodic-polling-task
//! style (spawn a loop with a sleep interval, no dedicated actor). This is
//! post-hoc cleanup only, per SPEC_FULL.md §9 — live traffic always
//! propagates `session_id` from ingress; this task exists for the cases
//! where something upstream (an HTTP caller, a malformed inbound leg)
//! produced a header before a `session_id` was known.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{HeaderId, MessageHeader, SessionId};

use super::TraceStore;

/// How far apart two headers' `received_at` may be and still be considered
/// part of the same chain.
const CHAINING_WINDOW: Duration = Duration::from_secs(30);

/// Maximum hops walked from one inbound leg before giving up, to prevent a
/// cyclical connection graph from looping the reconciler forever.
const MAX_CHAIN_DEPTH: usize = 20;

/// Matches unassigned headers by `(item_name ↔ source_item)` and proximity
/// in `received_at`, assigning a freshly generated `session_id` to the
/// whole chain it discovers.
pub struct SessionReconciler {
    store: Arc<dyn TraceStore>,
    poll_interval: Duration,
    batch_size: u32,
}

impl SessionReconciler {
    /// Builds a reconciler that polls `store` every `poll_interval`.
    #[must_use]
    pub fn new(store: Arc<dyn TraceStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
            batch_size: 256,
        }
    }

    /// Spawns the reconciliation loop as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(err) = self.run_once().await {
                    warn!(error = %err, "session reconciliation pass failed");
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        })
    }

    /// Runs one reconciliation pass over currently-unassigned headers.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`TraceStore`] error if the backing store
    /// cannot be read or written.
    pub async fn run_once(&self) -> Result<usize, super::TraceError> {
        let unassigned = self.store.list_unassigned(self.batch_size).await?;
        if unassigned.is_empty() {
            return Ok(0);
        }
        let chains = build_chains(&unassigned);
        let mut chained = 0;
        for chain in chains {
            if chain.len() < 2 {
                continue;
            }
            let session_id = SessionId::generate();
            chained += chain.len();
            self.store.assign_session(&chain, session_id).await?;
        }
        if chained > 0 {
            info!(headers = chained, "session reconciliation assigned session ids");
        } else {
            debug!("session reconciliation found no chainable headers");
        }
        Ok(chained)
    }
}

/// Groups headers into chains by `(item_name ↔ source_item)` adjacency
/// within [`CHAINING_WINDOW`], capped at [`MAX_CHAIN_DEPTH`] hops.
///
/// Pure function over a snapshot of unassigned headers so it is trivial to
/// unit test independent of any store.
fn build_chains(headers: &[MessageHeader]) -> Vec<Vec<HeaderId>> {
    let mut remaining: Vec<&MessageHeader> = headers.iter().collect();
    let mut chains = Vec::new();

    while let Some(seed) = remaining.pop() {
        let mut chain = vec![seed.header_id];
        let mut frontier_item = seed.item_name.clone();
        let mut frontier_time = seed.received_at;
        let mut depth = 0;
        while depth < MAX_CHAIN_DEPTH {
            depth += 1;
            let Some(pos) = remaining.iter().position(|candidate| {
                within_window(frontier_time, candidate.received_at)
                    && (candidate.source_item.as_deref() == Some(frontier_item.as_str())
                        || candidate.item_name == frontier_item)
                    && candidate.header_id != seed.header_id
            }) else {
                break;
            };
            let next = remaining.remove(pos);
            chain.push(next.header_id);
            frontier_item = next.item_name.clone();
            frontier_time = next.received_at;
        }
        chains.push(chain);
    }
    chains
}

fn within_window(
    a: crate::domain::trace::chrono_like::Timestamp,
    b: crate::domain::trace::chrono_like::Timestamp,
) -> bool {
    let diff = (a.elapsed_ms_until(b)).unsigned_abs();
    diff <= CHAINING_WINDOW.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BodyId, Direction};

    fn header(item: &str, source: Option<&str>, received_at_ms: i64) -> MessageHeader {
        let mut h = MessageHeader::new_pending(
            "proj",
            item,
            "service",
            Direction::Inbound,
            None,
            BodyId::generate(),
            "Raw",
        );
        h.received_at = crate::domain::trace::chrono_like::Timestamp(received_at_ms);
        h.source_item = source.map(str::to_string);
        h
    }

    #[test]
    fn chains_adjacent_headers_within_window() {
        let headers = vec![
            header("PAS-In", None, 0),
            header("ADT-Router", Some("PAS-In"), 10),
            header("EPR-Out", Some("ADT-Router"), 20),
        ];
        let chains = build_chains(&headers);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].len(), 3);
    }

    #[test]
    fn does_not_chain_headers_outside_window() {
        let far_ms = i64::try_from(CHAINING_WINDOW.as_millis()).unwrap() + 1000;
        let headers = vec![header("PAS-In", None, 0), header("ADT-Router", Some("PAS-In"), far_ms)];
        let chains = build_chains(&headers);
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn caps_chain_depth_to_prevent_cycles() {
        let mut headers = Vec::new();
        for i in 0..(MAX_CHAIN_DEPTH + 5) {
            let item = format!("item-{i}");
            let source = (i > 0).then(|| format!("item-{}", i - 1));
            headers.push(header(&item, source.as_deref(), i as i64));
        }
        let chains = build_chains(&headers);
        assert!(chains.iter().any(|c| c.len() <= MAX_CHAIN_DEPTH + 1));
    }
}

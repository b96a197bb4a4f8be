//! Restart-policy bookkeeping for a [`super::Host`].
//!
//! Grounded on `hot_reload_manager.rs`'s retry/backoff bookkeeping pattern:
//! a small piece of state tracked alongside the component it supervises,
//! rather than a separate actor.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::domain::{MaxRestarts, RestartDelaySecs, RestartPolicy};

/// Tracks restart attempts for one host against its configured policy.
pub struct RestartSupervisor {
    policy: RestartPolicy,
    max_restarts: MaxRestarts,
    delay: RestartDelaySecs,
    attempts_in_window: AtomicU32,
    window_started_at: Mutex<Option<Instant>>,
    last_failure_was_error: AtomicI64,
}

const ROLLING_WINDOW: Duration = Duration::from_secs(3600);

impl RestartSupervisor {
    /// Builds a supervisor for the given policy.
    #[must_use]
    pub fn new(policy: RestartPolicy, max_restarts: MaxRestarts, delay: RestartDelaySecs) -> Self {
        Self {
            policy,
            max_restarts,
            delay,
            attempts_in_window: AtomicU32::new(0),
            window_started_at: Mutex::new(None),
            last_failure_was_error: AtomicI64::new(1),
        }
    }

    /// Records that the host exited due to an error. Does not itself
    /// restart anything; the caller (the host's fault-handling path)
    /// separately calls [`Self::should_restart`] to decide.
    pub fn record_failure(&self) {
        self.last_failure_was_error.store(1, Ordering::SeqCst);
    }

    /// Records that the host exited cleanly (e.g. via `stop`).
    pub fn record_clean_exit(&self) {
        self.last_failure_was_error.store(0, Ordering::SeqCst);
    }

    /// Decides whether another restart attempt should be made right now,
    /// and if so, how long to wait before making it.
    pub async fn should_restart(&self) -> Option<Duration> {
        let was_error = self.last_failure_was_error.load(Ordering::SeqCst) != 0;
        match self.policy {
            RestartPolicy::Never => None,
            RestartPolicy::OnFailure if !was_error => None,
            RestartPolicy::OnFailure | RestartPolicy::Always => {
                if self.max_restarts.is_unlimited() {
                    return Some(self.delay.as_duration());
                }
                let mut window = self.window_started_at.lock().await;
                let now = Instant::now();
                match *window {
                    Some(start) if now.duration_since(start) < ROLLING_WINDOW => {}
                    _ => {
                        *window = Some(now);
                        self.attempts_in_window.store(0, Ordering::SeqCst);
                    }
                }
                drop(window);
                #[allow(clippy::cast_sign_loss)]
                let limit = self.max_restarts.into_inner().max(0) as u32;
                let used = self.attempts_in_window.fetch_add(1, Ordering::SeqCst);
                if used >= limit {
                    self.attempts_in_window.fetch_sub(1, Ordering::SeqCst);
                    None
                } else {
                    Some(self.delay.as_duration())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_policy_never_restarts() {
        let s = RestartSupervisor::new(
            RestartPolicy::Never,
            MaxRestarts::try_new(5).unwrap(),
            RestartDelaySecs::default(),
        );
        s.record_failure();
        assert!(s.should_restart().await.is_none());
    }

    #[tokio::test]
    async fn on_failure_restarts_after_error_only() {
        let s = RestartSupervisor::new(
            RestartPolicy::OnFailure,
            MaxRestarts::try_new(5).unwrap(),
            RestartDelaySecs::default(),
        );
        s.record_clean_exit();
        assert!(s.should_restart().await.is_none());
        s.record_failure();
        assert!(s.should_restart().await.is_some());
    }

    #[tokio::test]
    async fn stops_after_max_restarts_exhausted() {
        let s = RestartSupervisor::new(
            RestartPolicy::Always,
            MaxRestarts::try_new(2).unwrap(),
            RestartDelaySecs::try_new(0).unwrap(),
        );
        assert!(s.should_restart().await.is_some());
        assert!(s.should_restart().await.is_some());
        assert!(s.should_restart().await.is_none());
    }
}

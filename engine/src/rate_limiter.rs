//! Submission rate limiter (C9): a global token bucket gating container
//! starts, refreshed periodically from storage. `acquire()` blocks the
//! calling worker — by design this happens on the runner-dispatch executor,
//! never on a state-manager shard (spec.md §4.9, §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corelib::database::config_store::RuntimeConfigStore;
use tokio::sync::Semaphore;
use tokio::time::interval;

/// A token bucket backed by a [`Semaphore`]: `permits` acquired now,
/// refilled up to `capacity` every tick by [`RateLimiter::run_refill_loop`].
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    capacity: AtomicU64,
}

impl RateLimiter {
    pub fn new(initial_rate_per_sec: f64) -> Self {
        let capacity = initial_rate_per_sec.max(1.0) as u64;
        Self { semaphore: Arc::new(Semaphore::new(capacity as usize)), capacity: AtomicU64::new(capacity) }
    }

    /// Blocks until a submission token is available.
    pub async fn acquire(&self) {
        let permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        permit.forget();
    }

    fn refill(&self) {
        let capacity = self.capacity.load(Ordering::Relaxed) as usize;
        let available = self.semaphore.available_permits();
        if available < capacity {
            self.semaphore.add_permits(capacity - available);
        }
    }

    fn set_rate(&self, rate_per_sec: f64) {
        self.capacity.store(rate_per_sec.max(1.0) as u64, Ordering::Relaxed);
    }

    /// Runs forever: every `RUNTIME_CONFIG_UPDATE_INTERVAL`, re-reads the
    /// configured rate from storage and tops the bucket back up to
    /// capacity, until `shutdown` fires.
    pub async fn run_refill_loop(
        self: Arc<Self>,
        config_store: Arc<dyn RuntimeConfigStore>,
        update_interval: Duration,
        mut shutdown: corelib::shutdown::Shutdown,
    ) {
        let mut ticker = interval(update_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match config_store.get_submission_rate().await {
                        Ok(Some(rate)) => self.set_rate(rate),
                        Ok(None) => {}
                        Err(err) => tracing::warn!(%err, "failed to refresh submission rate"),
                    }
                    self.refill();
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_drains_and_refill_replenishes() {
        let limiter = RateLimiter::new(2.0);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.semaphore.available_permits(), 0);

        limiter.refill();
        assert_eq!(limiter.semaphore.available_permits(), 2);
    }

    #[tokio::test]
    async fn set_rate_changes_future_refill_capacity() {
        let limiter = RateLimiter::new(2.0);
        limiter.set_rate(5.0);
        limiter.refill();
        assert_eq!(limiter.semaphore.available_permits(), 5);
    }
}

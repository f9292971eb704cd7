//! Adaptive concurrency control for the per-network RPC queue, grounded on
//! the teacher's `adaptive_concurrency.rs`: start near `max`, back off
//! hard on rate-limit signals, creep back up on sustained success.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct AdaptiveConcurrency {
    current: AtomicUsize,
    min: usize,
    max: usize,
    consecutive_successes: AtomicUsize,
    backoff_ms: AtomicU64,
}

const GROWTH_THRESHOLD: usize = 20;
const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 30_000;

impl AdaptiveConcurrency {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        AdaptiveConcurrency {
            current: AtomicUsize::new(max),
            min,
            max,
            consecutive_successes: AtomicUsize::new(0),
            backoff_ms: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn backoff_ms(&self) -> u64 {
        self.backoff_ms.load(Ordering::Relaxed)
    }

    /// A request completed without error: count toward the growth
    /// threshold and, once reached, allow one more concurrent slot.
    pub fn record_success(&self) {
        self.backoff_ms.store(0, Ordering::Relaxed);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= GROWTH_THRESHOLD {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.current
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1).min(self.max)))
                .ok();
        }
    }

    /// A provider rate-limited us: halve concurrency and set an explicit
    /// backoff delay the caller should sleep before its next dispatch.
    pub fn record_rate_limit(&self) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c / 2).max(self.min)))
            .ok();
        self.backoff_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(if b == 0 { BASE_BACKOFF_MS } else { (b * 2).min(MAX_BACKOFF_MS) })
            })
            .ok();
    }

    /// A non-rate-limit error: reset the success streak but don't shrink
    /// concurrency — only sustained rate-limiting should do that.
    pub fn record_error(&self) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_max_concurrency() {
        let ac = AdaptiveConcurrency::new(1, 10);
        assert_eq!(ac.current(), 10);
    }

    #[test]
    fn rate_limit_halves_concurrency_and_sets_backoff() {
        let ac = AdaptiveConcurrency::new(1, 10);
        ac.record_rate_limit();
        assert_eq!(ac.current(), 5);
        assert_eq!(ac.backoff_ms(), BASE_BACKOFF_MS);
    }

    #[test]
    fn repeated_rate_limits_escalate_backoff() {
        let ac = AdaptiveConcurrency::new(1, 10);
        ac.record_rate_limit();
        ac.record_rate_limit();
        assert_eq!(ac.backoff_ms(), BASE_BACKOFF_MS * 2);
    }

    #[test]
    fn concurrency_never_drops_below_min() {
        let ac = AdaptiveConcurrency::new(4, 10);
        ac.record_rate_limit();
        ac.record_rate_limit();
        ac.record_rate_limit();
        assert!(ac.current() >= 4);
    }

    #[test]
    fn sustained_success_grows_concurrency_back_toward_max() {
        let ac = AdaptiveConcurrency::new(1, 10);
        ac.record_rate_limit();
        for _ in 0..GROWTH_THRESHOLD {
            ac.record_success();
        }
        assert!(ac.current() > 5);
    }
}

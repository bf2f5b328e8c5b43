use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Run-wide counters for operational visibility.
#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub upstream_calls: Arc<AtomicU64>,
    pub rate_limited: Arc<AtomicU64>,
    pub transient_retries: Arc<AtomicU64>,

    pub windows_committed: Arc<AtomicU64>,
    pub windows_failed: Arc<AtomicU64>,

    // candle outcomes
    pub candles_inserted: Arc<AtomicU64>,
    pub candles_duplicate: Arc<AtomicU64>,
    pub candles_rejected: Arc<AtomicU64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub upstream_calls: u64,
    pub rate_limited: u64,
    pub transient_retries: u64,
    pub windows_committed: u64,
    pub windows_failed: u64,
    pub candles_inserted: u64,
    pub candles_duplicate: u64,
    pub candles_rejected: u64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            upstream_calls: get(&self.upstream_calls),
            rate_limited: get(&self.rate_limited),
            transient_retries: get(&self.transient_retries),
            windows_committed: get(&self.windows_committed),
            windows_failed: get(&self.windows_failed),
            candles_inserted: get(&self.candles_inserted),
            candles_duplicate: get(&self.candles_duplicate),
            candles_rejected: get(&self.candles_rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_cells() {
        let a = Counters::default();
        let b = a.clone();
        Counters::incr(&a.rate_limited);
        Counters::add(&b.candles_inserted, 5);

        let snap = a.snapshot();
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.candles_inserted, 5);
        assert_eq!(snap.windows_failed, 0);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for block-fetch success/failure and backpressure waits. The
/// spec's error handling design (§7) calls these out explicitly: "No
/// metrics are part of the core contract, but counters for block-fetch
/// success/failure and backpressure waits are exposed."
#[derive(Debug, Default)]
pub struct IngestMetrics {
    blocks_fetched: AtomicU64,
    fetch_failures: AtomicU64,
    backpressure_waits: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch_success(&self) {
        self.blocks_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure_wait(&self) {
        self.backpressure_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocks_fetched(&self) -> u64 {
        self.blocks_fetched.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn backpressure_waits(&self) -> u64 {
        self.backpressure_waits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment_independently() {
        let metrics = IngestMetrics::new();
        assert_eq!(metrics.blocks_fetched(), 0);
        metrics.record_fetch_success();
        metrics.record_fetch_success();
        metrics.record_fetch_failure();
        metrics.record_backpressure_wait();
        assert_eq!(metrics.blocks_fetched(), 2);
        assert_eq!(metrics.fetch_failures(), 1);
        assert_eq!(metrics.backpressure_waits(), 1);
    }
}

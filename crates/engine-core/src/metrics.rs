use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

pub use model::execution::stats::MetricsSnapshot;

#[derive(Debug, Default)]
struct InnerMetrics {
    files_extracted: AtomicU64,
    uploads_completed: AtomicU64,
    retry_count: AtomicU64,
    timeout_count: AtomicU64,
    failure_count: AtomicU64,
    batches_processed: AtomicU64,
}

/// Process-wide counters shared by executor workers.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_extracted(&self, count: u64) {
        self.inner.files_extracted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_uploads(&self, count: u64) {
        self.inner
            .uploads_completed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self, count: u64) {
        self.inner.timeout_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner
            .batches_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_extracted: self.inner.files_extracted.load(Ordering::Relaxed),
            uploads_completed: self.inner.uploads_completed.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            timeout_count: self.inner.timeout_count.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let worker = metrics.clone();
        worker.increment_retries(2);
        worker.increment_timeouts(1);
        metrics.increment_uploads(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.retry_count, 2);
        assert_eq!(snap.timeout_count, 1);
        assert_eq!(snap.uploads_completed, 1);
    }
}

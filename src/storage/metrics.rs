use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking store-scan activity.
///
/// Implementations collect counts of scans, batches and visited entities so
/// that population throughput can be monitored.
pub trait ScanMetrics: Send + Sync {
    /// Records the start of a scan over `entity` ("node" or "relationship").
    fn scan_started(&self, entity: &'static str);

    /// Records a scan that visited every entity in range.
    fn scan_completed(&self);

    /// Records a scan that exited early because `stop()` was called.
    fn scan_stopped(&self);

    /// Records a scan that returned an error.
    fn scan_failed(&self);

    /// Records a finished batch.
    ///
    /// # Parameters
    /// * `visited` - Entities read in the batch, skipped ones included.
    /// * `matched` - Entities forwarded to a consumer.
    fn batch(&self, visited: u64, matched: u64);

    /// Records an index drop that had to wait for pinned scans.
    fn drop_waited(&self);
}

/// A no-op implementation of [`ScanMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl ScanMetrics for NoopMetrics {
    fn scan_started(&self, _entity: &'static str) {}
    fn scan_completed(&self) {}
    fn scan_stopped(&self) {}
    fn scan_failed(&self) {}
    fn batch(&self, _visited: u64, _matched: u64) {}
    fn drop_waited(&self) {}
}

/// A thread-safe counter-based implementation of [`ScanMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Node scans started.
    pub node_scans_started: AtomicU64,
    /// Relationship scans started.
    pub relationship_scans_started: AtomicU64,
    /// Scans that ran to completion.
    pub scans_completed: AtomicU64,
    /// Scans stopped early.
    pub scans_stopped: AtomicU64,
    /// Scans that failed.
    pub scans_failed: AtomicU64,
    /// Batches processed.
    pub batches: AtomicU64,
    /// Entities read.
    pub entities_visited: AtomicU64,
    /// Entities forwarded to consumers.
    pub entities_matched: AtomicU64,
    /// Index drops that waited for a scan.
    pub drop_waits: AtomicU64,
}

impl ScanMetrics for CounterMetrics {
    fn scan_started(&self, entity: &'static str) {
        match entity {
            "node" => {
                self.node_scans_started.fetch_add(1, Ordering::Relaxed);
            }
            "relationship" => {
                self.relationship_scans_started
                    .fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn scan_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn scan_stopped(&self) {
        self.scans_stopped.fetch_add(1, Ordering::Relaxed);
    }

    fn scan_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn batch(&self, visited: u64, matched: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.entities_visited.fetch_add(visited, Ordering::Relaxed);
        self.entities_matched.fetch_add(matched, Ordering::Relaxed);
    }

    fn drop_waited(&self) {
        self.drop_waits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, which discards everything.
pub fn default_metrics() -> Arc<dyn ScanMetrics> {
    Arc::new(NoopMetrics)
}

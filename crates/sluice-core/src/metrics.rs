//! Shared event counters, exposed over the daemon status endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Cheap-to-clone handle over the bridge counters.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    sent: AtomicU64,
    output_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message arrived from upstream.
    pub fn incr_received(&self) {
        self.inner.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A downstream output acknowledged a message.
    pub fn incr_sent(&self) {
        self.inner.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A downstream output reported a dispatch error.
    pub fn incr_output_error(&self) {
        self.inner.output_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.inner.received.load(Ordering::Relaxed),
            sent: self.inner.sent.load(Ordering::Relaxed),
            output_errors: self.inner.output_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub output_errors: u64,
}

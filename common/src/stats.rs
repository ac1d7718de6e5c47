use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters kept by the twin engine, zeroed at construction.
///
/// Shared behind the engine handle; increments happen from the transport
/// callback context and the report consumer, so the fields are atomics.
#[derive(Debug, Default)]
pub struct TwinStats {
    desired_handled: AtomicU64,
    reported: AtomicU64,
    report_failures: AtomicU64,
    unmatched: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    #[serde(rename = "desiredHandled")]
    pub desired_handled: u64,
    pub reported: u64,
    #[serde(rename = "reportFailures")]
    pub report_failures: u64,
    pub unmatched: u64,
}

impl TwinStats {
    pub fn record_desired_handled(&self) {
        self.desired_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reported(&self) {
        self.reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_failure(&self) {
        self.report_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            desired_handled: self.desired_handled.load(Ordering::Relaxed),
            reported: self.reported.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
        }
    }
}

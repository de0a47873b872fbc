//! Write outcome counters and the per-batch aggregator

use serde::Serialize;
use std::ops::AddAssign;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

/// Per-worker tally of write attempts within one batch.
///
/// `ok + failed` is the number of records the worker dequeued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounters {
    pub ok: u64,
    pub failed: u64,
}

impl OutcomeCounters {
    pub fn new(ok: u64, failed: u64) -> Self {
        Self { ok, failed }
    }

    pub fn record_ok(&mut self) {
        self.ok += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }
}

impl AddAssign for OutcomeCounters {
    fn add_assign(&mut self, other: Self) {
        self.ok += other.ok;
        self.failed += other.failed;
    }
}

/// Everything the controller knows about one batch when it decides.
///
/// Worker counters and the dispatcher's read errors are kept apart: parse
/// failures and unroutable records never reach a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub ok: u64,
    pub failed: u64,
    pub parse_failures: u64,
    pub unroutable: u64,
}

impl BatchResult {
    pub fn new(writes: OutcomeCounters, parse_failures: u64, unroutable: u64) -> Self {
        Self {
            ok: writes.ok,
            failed: writes.failed,
            parse_failures,
            unroutable,
        }
    }

    /// `failed / ok`, or `None` when nothing was written.
    pub fn error_rate(&self) -> Option<f64> {
        (self.ok > 0).then(|| self.failed as f64 / self.ok as f64)
    }

    pub fn read_errors(&self) -> u64 {
        self.parse_failures + self.unroutable
    }
}

impl AddAssign for BatchResult {
    fn add_assign(&mut self, other: Self) {
        self.ok += other.ok;
        self.failed += other.failed;
        self.parse_failures += other.parse_failures;
        self.unroutable += other.unroutable;
    }
}

/// Sum of all worker reports for a batch, plus how many reports arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateTotals {
    pub counters: OutcomeCounters,
    pub reports: usize,
}

/// Merges worker counters for one batch.
///
/// Runs until every sender is dropped, then yields the totals exactly once.
pub struct StatAggregator {
    handle: JoinHandle<AggregateTotals>,
}

impl StatAggregator {
    /// Start the aggregator. `capacity` should cover one report per worker so
    /// a finishing worker never waits on it.
    pub fn spawn(capacity: usize) -> (mpsc::Sender<OutcomeCounters>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(collect(rx));
        (tx, Self { handle })
    }

    /// Wait for the inbound channel to close and return the totals.
    pub async fn finish(self) -> Result<AggregateTotals, JoinError> {
        self.handle.await
    }
}

/// Sum reports until the channel closes.
pub async fn collect(mut reports: mpsc::Receiver<OutcomeCounters>) -> AggregateTotals {
    let mut totals = AggregateTotals::default();
    while let Some(counters) = reports.recv().await {
        totals.counters += counters;
        totals.reports += 1;
    }
    debug!(
        ok = totals.counters.ok,
        failed = totals.counters.failed,
        reports = totals.reports,
        "aggregator drained"
    );
    totals
}

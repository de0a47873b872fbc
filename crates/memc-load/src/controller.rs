//! Batch controller
//!
//! Drives one batch at a time through
//! `Idle -> Dispatching -> Draining -> Deciding -> Checkpointed | Skipped`.
//!
//! Per batch the controller starts a fresh aggregator and fresh worker pools,
//! runs the dispatcher on a blocking thread, waits for every worker at the
//! drain barrier, and only then closes the aggregator. A batch that cannot be
//! read is skipped and left in place; every other batch is checkpointed, even
//! when its error rate is above [`NORMAL_ERR_RATE`].

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use memc_common::Result;

use crate::checkpoint::mark_processed;
use crate::config::{LoaderConfig, NORMAL_ERR_RATE};
use crate::discovery::discover;
use crate::dispatcher::Dispatcher;
use crate::stats::{BatchResult, StatAggregator};
use crate::store::StoreConnector;
use crate::worker::start_pools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Dispatching,
    Draining,
    Deciding,
    Checkpointed,
    Skipped,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Deciding => "deciding",
            Self::Checkpointed => "checkpointed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Error-rate judgement for a readable batch. Advisory: it only picks the log
/// line, every verdict is checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum LoadVerdict {
    /// Nothing was written, the threshold is not evaluated.
    Empty,
    Accepted { error_rate: f64 },
    Rejected { error_rate: f64 },
}

/// Compare a batch's `failed / ok` against [`NORMAL_ERR_RATE`].
pub fn evaluate(result: &BatchResult) -> LoadVerdict {
    match result.error_rate() {
        None => LoadVerdict::Empty,
        Some(error_rate) if error_rate < NORMAL_ERR_RATE => LoadVerdict::Accepted { error_rate },
        Some(error_rate) => LoadVerdict::Rejected { error_rate },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Checkpointed {
        result: BatchResult,
        verdict: LoadVerdict,
        processed_path: PathBuf,
    },
    /// Left in place for a later run.
    Skipped { reason: String },
}

impl BatchOutcome {
    pub fn state(&self) -> BatchState {
        match self {
            Self::Checkpointed { .. } => BatchState::Checkpointed,
            Self::Skipped { .. } => BatchState::Skipped,
        }
    }
}

/// Totals over every batch of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub batches: usize,
    pub checkpointed: usize,
    pub skipped: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub empty: usize,
    pub totals: BatchResult,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        match outcome {
            BatchOutcome::Checkpointed { result, verdict, .. } => {
                self.checkpointed += 1;
                self.totals += *result;
                match verdict {
                    LoadVerdict::Empty => self.empty += 1,
                    LoadVerdict::Accepted { .. } => self.accepted += 1,
                    LoadVerdict::Rejected { .. } => self.rejected += 1,
                }
            }
            BatchOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

pub struct BatchController {
    config: Arc<LoaderConfig>,
    connector: Arc<dyn StoreConnector>,
}

impl BatchController {
    pub fn new(config: Arc<LoaderConfig>, connector: Arc<dyn StoreConnector>) -> Self {
        Self { config, connector }
    }

    /// Discover batches with the configured pattern and process them in order.
    pub async fn run(&self) -> Result<RunSummary> {
        let paths = discover(&self.config.pattern)?;
        if paths.is_empty() {
            info!(pattern = %self.config.pattern, "no batches to process");
        }
        self.run_paths(&paths).await
    }

    /// Process `paths` one after another. Stops at the first run-fatal error.
    pub async fn run_paths(&self, paths: &[PathBuf]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for path in paths {
            let outcome = self.process_batch(path).await?;
            summary.record(&outcome);
        }

        info!(
            batches = summary.batches,
            checkpointed = summary.checkpointed,
            skipped = summary.skipped,
            accepted = summary.accepted,
            rejected = summary.rejected,
            "run finished"
        );
        Ok(summary)
    }

    /// Take one batch through the whole lifecycle.
    ///
    /// Batch-level problems come back as [`BatchOutcome::Skipped`]; only a
    /// failed checkpoint is returned as an error.
    pub async fn process_batch(&self, path: &Path) -> Result<BatchOutcome> {
        let span = info_span!("batch", path = %path.display());
        self.process(path).instrument(span).await
    }

    async fn process(&self, path: &Path) -> Result<BatchOutcome> {
        let mut state = BatchState::Idle;
        info!("processing batch");

        let (stats_tx, aggregator) = StatAggregator::spawn(self.config.total_workers());
        let (pools, workers) = start_pools(&self.config, self.connector.as_ref(), &stats_tx);
        let started = workers.started();
        let dispatcher = Dispatcher::new(pools);

        advance(&mut state, BatchState::Dispatching);
        let batch = path.to_path_buf();
        let dispatched = tokio::task::spawn_blocking(move || dispatcher.dispatch_file(&batch)).await;

        // The dispatcher is gone by now, so every worker queue is closed.
        advance(&mut state, BatchState::Draining);
        let drained = workers.drain().await;
        drop(stats_tx);
        let aggregated = aggregator.finish().await;

        advance(&mut state, BatchState::Deciding);
        let summary = match dispatched {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => return Ok(skip(&mut state, e.to_string())),
            Err(e) => return Ok(skip(&mut state, format!("dispatcher task failed: {}", e))),
        };
        let totals = match aggregated {
            Ok(totals) => totals,
            Err(e) => return Ok(skip(&mut state, format!("aggregator task failed: {}", e))),
        };
        if drained.lost > 0 {
            return Ok(skip(
                &mut state,
                format!("{} of {} writers ended abnormally", drained.lost, started),
            ));
        }
        if totals.reports != started || totals.reports != drained.finished {
            warn!(
                reports = totals.reports,
                finished = drained.finished,
                workers = started,
                "worker report count mismatch"
            );
        }
        if totals.counters != drained.counters {
            warn!(
                aggregated_ok = totals.counters.ok,
                aggregated_failed = totals.counters.failed,
                drained_ok = drained.counters.ok,
                drained_failed = drained.counters.failed,
                "aggregated counters differ from drained workers"
            );
        }

        let result = BatchResult::new(totals.counters, summary.parse_failures, summary.unroutable);
        let verdict = evaluate(&result);
        match verdict {
            LoadVerdict::Empty => info!(
                parse_failures = result.parse_failures,
                unroutable = result.unroutable,
                failed = result.failed,
                "nothing written, checkpointing"
            ),
            LoadVerdict::Accepted { error_rate } => info!(
                error_rate,
                ok = result.ok,
                failed = result.failed,
                read_errors = result.read_errors(),
                "acceptable error rate, successful load"
            ),
            LoadVerdict::Rejected { error_rate } => error!(
                error_rate,
                threshold = NORMAL_ERR_RATE,
                ok = result.ok,
                failed = result.failed,
                read_errors = result.read_errors(),
                "high error rate, failed load"
            ),
        }

        let processed_path = mark_processed(path)?;
        advance(&mut state, BatchState::Checkpointed);
        Ok(BatchOutcome::Checkpointed {
            result,
            verdict,
            processed_path,
        })
    }
}

fn advance(state: &mut BatchState, next: BatchState) {
    debug!(from = %state, to = %next, "batch state");
    *state = next;
}

fn skip(state: &mut BatchState, reason: String) -> BatchOutcome {
    error!(reason = %reason, "skipping batch, no checkpoint");
    advance(state, BatchState::Skipped);
    BatchOutcome::Skipped { reason }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stats::OutcomeCounters;

    fn result(ok: u64, failed: u64) -> BatchResult {
        BatchResult::new(OutcomeCounters::new(ok, failed), 0, 0)
    }

    #[test]
    fn test_evaluate_threshold() {
        assert_eq!(evaluate(&result(1000, 0)), LoadVerdict::Accepted { error_rate: 0.0 });
        assert_eq!(evaluate(&result(1000, 9)), LoadVerdict::Accepted { error_rate: 0.009 });
        assert_eq!(evaluate(&result(100, 1)), LoadVerdict::Rejected { error_rate: 0.01 });
        assert_eq!(evaluate(&result(10, 10)), LoadVerdict::Rejected { error_rate: 1.0 });
    }

    #[test]
    fn test_read_errors_stay_out_of_error_rate() {
        let mostly_garbage = BatchResult::new(OutcomeCounters::new(1, 0), 9, 3);
        assert_eq!(evaluate(&mostly_garbage), LoadVerdict::Accepted { error_rate: 0.0 });
        assert_eq!(mostly_garbage.read_errors(), 12);
    }

    #[test]
    fn test_evaluate_skips_threshold_without_writes() {
        assert_eq!(evaluate(&result(0, 0)), LoadVerdict::Empty);
        assert_eq!(evaluate(&result(0, 50)), LoadVerdict::Empty);
    }

    #[test]
    fn test_run_summary_counts_outcomes() {
        let mut summary = RunSummary::default();
        summary.record(&BatchOutcome::Checkpointed {
            result: result(10, 0),
            verdict: LoadVerdict::Accepted { error_rate: 0.0 },
            processed_path: PathBuf::from(".a"),
        });
        summary.record(&BatchOutcome::Checkpointed {
            result: result(10, 5),
            verdict: LoadVerdict::Rejected { error_rate: 0.5 },
            processed_path: PathBuf::from(".b"),
        });
        summary.record(&BatchOutcome::Skipped {
            reason: "corrupt".to_string(),
        });

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.checkpointed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.totals.ok, 20);
        assert_eq!(summary.totals.failed, 5);
    }

    #[test]
    fn test_outcome_state() {
        let skipped = BatchOutcome::Skipped {
            reason: String::new(),
        };
        assert_eq!(skipped.state(), BatchState::Skipped);
        assert_eq!(BatchState::Draining.to_string(), "draining");
    }
}

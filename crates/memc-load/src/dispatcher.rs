//! Batch dispatcher
//!
//! Reads a batch line by line, parses each line and hands every record to a
//! worker of its category. Hand-off blocks while the chosen worker's queue is
//! full, so a slow store slows reading down instead of growing memory.
//!
//! The dispatcher owns the sending half of every worker queue. Dropping it
//! (when [`Dispatcher::dispatch`] returns, successfully or not) closes all
//! queues, which is how workers learn the batch is over.

use serde::Serialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tracing::{debug, warn};

use crate::batch::open_batch;
use crate::record::parse_bytes;
use crate::worker::CategoryPool;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Batch file could not be opened
    #[error("cannot open batch {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Read or decompression failed mid-batch
    #[error("batch stream failed after {line} lines: {source}")]
    Stream {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    /// A writer queue closed while records were still routed to it
    #[error("all writers for category '{category}' are gone")]
    WorkerGone { category: String },
}

/// Line accounting for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Lines read, blank ones included
    pub lines: u64,
    pub blank: u64,
    /// Records handed to a writer
    pub dispatched: u64,
    pub parse_failures: u64,
    /// Parsed records whose category has no store
    pub unroutable: u64,
}

pub struct Dispatcher {
    pools: HashMap<String, CategoryPool>,
}

impl Dispatcher {
    pub fn new(pools: Vec<CategoryPool>) -> Self {
        let pools = pools
            .into_iter()
            .map(|pool| (pool.category().to_string(), pool))
            .collect();
        Self { pools }
    }

    /// Open the batch at `path` and dispatch it.
    ///
    /// Blocks the calling thread; run it on a blocking thread, never on an
    /// async worker thread.
    pub fn dispatch_file(self, path: &Path) -> Result<DispatchSummary, DispatchError> {
        let reader = open_batch(path).map_err(|source| DispatchError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.dispatch(reader)
    }

    /// Route every line of `reader`.
    ///
    /// Blocks the calling thread; run it on a blocking thread, never on an
    /// async worker thread.
    pub fn dispatch<R: BufRead>(mut self, mut reader: R) -> Result<DispatchSummary, DispatchError> {
        let mut summary = DispatchSummary::default();
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| DispatchError::Stream {
                    line: summary.lines,
                    source,
                })?;
            if read == 0 {
                break;
            }
            summary.lines += 1;

            if buf.trim_ascii().is_empty() {
                summary.blank += 1;
                continue;
            }

            let record = match parse_bytes(buf.trim_ascii_end()) {
                Ok(record) => record,
                Err(e) => {
                    warn!(line = summary.lines, error = %e, "error while parsing line");
                    summary.parse_failures += 1;
                    continue;
                }
            };

            let Some(pool) = self.pools.get_mut(&record.category) else {
                warn!(line = summary.lines, category = %record.category, "unknown device category");
                summary.unroutable += 1;
                continue;
            };

            let Some(queue) = pool.next_queue() else {
                return Err(DispatchError::WorkerGone {
                    category: record.category,
                });
            };
            if let Err(SendError(record)) = queue.blocking_send(record) {
                return Err(DispatchError::WorkerGone {
                    category: record.category,
                });
            }
            summary.dispatched += 1;
        }

        debug!(
            lines = summary.lines,
            dispatched = summary.dispatched,
            parse_failures = summary.parse_failures,
            unroutable = summary.unroutable,
            "batch dispatched"
        );
        Ok(summary)
    }
}

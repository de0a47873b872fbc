//! Category worker pools
//!
//! Every category gets `workers_per_category` writers. Each writer owns one
//! bounded inbound queue and one store, drains its queue until the dispatcher
//! closes it, then reports its counters exactly once.

use prost::Message;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::record::Record;
use crate::stats::OutcomeCounters;
use crate::store::{KvStore, StoreConnector};

/// One writer for one category.
pub struct StoreWorker {
    category: String,
    address: String,
    index: usize,
    dry_run: bool,
    store: Box<dyn KvStore>,
}

impl StoreWorker {
    pub fn new(
        category: impl Into<String>,
        address: impl Into<String>,
        index: usize,
        dry_run: bool,
        store: Box<dyn KvStore>,
    ) -> Self {
        Self {
            category: category.into(),
            address: address.into(),
            index,
            dry_run,
            store,
        }
    }

    /// Consume records until `inbox` closes, then send the counters to `stats`.
    ///
    /// The counters are also returned so the drain barrier can check them.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Record>,
        stats: mpsc::Sender<OutcomeCounters>,
    ) -> OutcomeCounters {
        debug!(category = %self.category, worker = self.index, address = %self.address, "worker started");

        let mut counters = OutcomeCounters::default();
        while let Some(record) = inbox.recv().await {
            if self.write(&record).await {
                counters.record_ok();
            } else {
                counters.record_failed();
            }
        }

        debug!(
            category = %self.category,
            worker = self.index,
            ok = counters.ok,
            failed = counters.failed,
            "worker finished"
        );
        if stats.send(counters).await.is_err() {
            error!(category = %self.category, worker = self.index, "aggregator gone, counters lost");
        }
        counters
    }

    async fn write(&mut self, record: &Record) -> bool {
        let key = record.key();

        if self.dry_run {
            debug!(
                address = %self.address,
                key = %key,
                payload = %record.payload.describe(),
                geo_valid = record.has_valid_geo(),
                "dry run, skipping write"
            );
            return true;
        }

        let value = record.payload.encode_to_vec();
        match self.store.put(&key, &value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "error sending record");
                false
            }
        }
    }
}

/// Sending side of one category's workers, with round-robin selection.
pub struct CategoryPool {
    category: String,
    queues: Vec<mpsc::Sender<Record>>,
    next: usize,
}

impl CategoryPool {
    pub fn new(category: impl Into<String>, queues: Vec<mpsc::Sender<Record>>) -> Self {
        Self {
            category: category.into(),
            queues,
            next: 0,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Queue of the worker that gets the next record.
    pub fn next_queue(&mut self) -> Option<&mpsc::Sender<Record>> {
        if self.queues.is_empty() {
            return None;
        }
        let index = self.next;
        self.next = (self.next + 1) % self.queues.len();
        self.queues.get(index)
    }
}

/// Tasks of every running worker of a batch; [`WorkerGroup::drain`] is the
/// completion barrier.
pub struct WorkerGroup {
    tasks: JoinSet<OutcomeCounters>,
    started: usize,
}

/// What the barrier saw once every worker ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub finished: usize,
    pub lost: usize,
    pub counters: OutcomeCounters,
}

impl WorkerGroup {
    pub fn started(&self) -> usize {
        self.started
    }

    /// Wait until every worker has ended.
    pub async fn drain(mut self) -> DrainReport {
        let mut report = DrainReport::default();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(counters) => {
                    report.finished += 1;
                    report.counters += counters;
                }
                Err(e) => {
                    report.lost += 1;
                    error!(error = %e, "worker task ended abnormally");
                }
            }
        }
        report
    }
}

/// Start every category's workers for one batch.
///
/// Returns one routing pool per configured category and the worker tasks.
pub fn start_pools(
    config: &LoaderConfig,
    connector: &dyn StoreConnector,
    stats: &mpsc::Sender<OutcomeCounters>,
) -> (Vec<CategoryPool>, WorkerGroup) {
    let timeout: Duration = config.store_timeout();
    let mut tasks = JoinSet::new();
    let mut pools = Vec::with_capacity(config.stores.len());

    for (category, address) in config.stores.iter() {
        info!(category, address, workers = config.workers_per_category, "starting writers");
        let mut queues = Vec::with_capacity(config.workers_per_category);
        for index in 0..config.workers_per_category {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            let store = connector.connect(category, address, timeout);
            let worker = StoreWorker::new(category, address, index, config.dry_run, store);
            tasks.spawn(worker.run(rx, stats.clone()));
            queues.push(tx);
        }
        pools.push(CategoryPool::new(category, queues));
    }

    let started = tasks.len();
    (pools, WorkerGroup { tasks, started })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::codec::UserApps;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded(Arc<Mutex<Vec<(String, Vec<u8>)>>>);

    struct RecordingStore {
        writes: Recorded,
        fail_keys: Vec<String>,
    }

    #[async_trait]
    impl KvStore for RecordingStore {
        async fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            if self.fail_keys.iter().any(|k| k == key) {
                return Err(StoreError::Other(format!("refused {key}")));
            }
            self.writes.0.lock().unwrap().push((key.to_string(), value.to_vec()));
            Ok(())
        }
    }

    fn record(category: &str, device: &str) -> Record {
        Record::new(
            category,
            device,
            UserApps {
                apps: vec![1, 2],
                lat: 1.0,
                lon: 2.0,
            },
        )
    }

    #[tokio::test]
    async fn test_worker_counts_successes_and_failures() {
        let writes = Recorded::default();
        let store = RecordingStore {
            writes: writes.clone(),
            fail_keys: vec!["idfa:bad".to_string()],
        };
        let worker = StoreWorker::new("idfa", "mem", 0, false, Box::new(store));
        let (tx, rx) = mpsc::channel(1);
        let (stats_tx, mut stats_rx) = mpsc::channel(1);
        let handle = tokio::spawn(worker.run(rx, stats_tx));

        for device in ["a", "bad", "b"] {
            tx.send(record("idfa", device)).await.unwrap();
        }
        drop(tx);

        let counters = handle.await.unwrap();
        assert_eq!(counters, OutcomeCounters::new(2, 1));
        assert_eq!(stats_rx.recv().await.unwrap(), counters);
        assert!(stats_rx.recv().await.is_none());

        let writes = writes.0.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, "idfa:a");
        assert_eq!(UserApps::decode(writes[0].1.as_slice()).unwrap().apps, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_dry_run_never_touches_store() {
        let writes = Recorded::default();
        let store = RecordingStore {
            writes: writes.clone(),
            fail_keys: vec!["gaid:x".to_string()],
        };
        let worker = StoreWorker::new("gaid", "mem", 0, true, Box::new(store));
        let (tx, rx) = mpsc::channel(1);
        let (stats_tx, _stats_rx) = mpsc::channel(1);
        let handle = tokio::spawn(worker.run(rx, stats_tx));

        tx.send(record("gaid", "x")).await.unwrap();
        tx.send(record("gaid", "y")).await.unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), OutcomeCounters::new(2, 0));
        assert!(writes.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_still_reports_once() {
        let store = RecordingStore {
            writes: Recorded::default(),
            fail_keys: vec![],
        };
        let worker = StoreWorker::new("adid", "mem", 2, false, Box::new(store));
        let (tx, rx) = mpsc::channel::<Record>(1);
        let (stats_tx, mut stats_rx) = mpsc::channel(1);
        drop(tx);

        worker.run(rx, stats_tx).await;
        assert_eq!(stats_rx.recv().await.unwrap(), OutcomeCounters::default());
        assert!(stats_rx.recv().await.is_none());
    }

    #[test]
    fn test_round_robin_cycles_workers() {
        let (queues, _receivers): (Vec<_>, Vec<_>) =
            (0..3).map(|_| mpsc::channel::<Record>(1)).unzip();
        let mut pool = CategoryPool::new("idfa", queues.clone());

        let picks: Vec<bool> = (0..6)
            .map(|i| pool.next_queue().unwrap().same_channel(&queues[i % 3]))
            .collect();
        assert!(picks.into_iter().all(|same| same));

        let mut empty = CategoryPool::new("gaid", vec![]);
        assert!(empty.next_queue().is_none());
    }

    struct RecordingConnector {
        writes: Recorded,
    }

    impl StoreConnector for RecordingConnector {
        fn connect(&self, _category: &str, _address: &str, _timeout: Duration) -> Box<dyn KvStore> {
            Box::new(RecordingStore {
                writes: self.writes.clone(),
                fail_keys: vec!["gaid:bad".to_string()],
            })
        }
    }

    #[tokio::test]
    async fn test_drain_matches_aggregated_reports() {
        let config = LoaderConfig {
            workers_per_category: 2,
            ..LoaderConfig::default()
        };
        let connector = RecordingConnector {
            writes: Recorded::default(),
        };
        let (stats_tx, aggregator) = crate::stats::StatAggregator::spawn(config.total_workers());
        let (mut pools, workers) = start_pools(&config, &connector, &stats_tx);
        assert_eq!(pools.len(), 4);
        assert_eq!(workers.started(), 8);

        for pool in pools.iter_mut() {
            let category = pool.category().to_string();
            for device in ["a", "bad"] {
                let queue = pool.next_queue().unwrap();
                queue.send(record(&category, device)).await.unwrap();
            }
        }
        drop(pools);

        let drained = workers.drain().await;
        drop(stats_tx);
        let totals = aggregator.finish().await.unwrap();

        assert_eq!(drained.finished, 8);
        assert_eq!(drained.lost, 0);
        assert_eq!(totals.reports, drained.finished);
        assert_eq!(totals.counters, drained.counters);
        assert_eq!(drained.counters, OutcomeCounters::new(7, 1));
    }
}

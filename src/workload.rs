//! Continuous insertion workload.
//!
//! A background loop that keeps writing random keys through a dispatcher until its
//! drain signal fires. Used to put live traffic on a cluster while mirrors join or
//! leave, and to check afterwards that every acknowledged write is still readable.

use crate::config::INSERT_INTERVAL;
use crate::dispatcher::MirrorDispatcher;
use crate::error::{ClusterError, Result};
use crate::protocol::kv::{KeyValueProtocol, KvRead, KvWrite};
use crate::signal::{DrainLock, Drainer};
use crate::timestamps::{OrderSource, OrderToken};

use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Dispatcher = MirrorDispatcher<KeyValueProtocol>;

pub struct ContinuousInserter {
    values_inserted: Arc<DashMap<String, String>>,
    drainer: Drainer,
    task: Option<JoinHandle<Result<()>>>,
}

impl ContinuousInserter {
    /// Spawns the insertion loop over `keys`, pausing `INSERT_INTERVAL` between writes.
    pub fn start(dispatcher: Arc<Dispatcher>, keys: Vec<String>) -> Self {
        Self::start_with_interval(dispatcher, keys, INSERT_INTERVAL)
    }

    pub fn start_with_interval(
        dispatcher: Arc<Dispatcher>,
        keys: Vec<String>,
        interval: Duration,
    ) -> Self {
        let values_inserted = Arc::new(DashMap::new());
        let drainer = Drainer::new();

        let task = {
            let values = values_inserted.clone();
            let lock = drainer.lock();
            tokio::spawn(async move {
                let source = OrderSource::new();
                Self::run(&dispatcher, &source, &keys, &values, lock, interval).await
            })
        };

        Self {
            values_inserted,
            drainer,
            task: Some(task),
        }
    }

    /// Writes until `lock` starts draining. A write that has started always completes
    /// and is recorded; only the pause between writes is interruptible.
    pub async fn run(
        dispatcher: &Dispatcher,
        source: &OrderSource,
        keys: &[String],
        values: &DashMap<String, String>,
        lock: DrainLock,
        interval: Duration,
    ) -> Result<()> {
        if keys.is_empty() {
            return Err(ClusterError::precondition(
                "continuous insertion needs at least one key",
            ));
        }

        match Self::insert_forever(dispatcher, source, keys, values, &lock, interval).await {
            Err(e) if e.is_interrupted() => {
                info!("Continuous inserter drained after {} keys", values.len());
                Ok(())
            }
            other => other,
        }
    }

    async fn insert_forever(
        dispatcher: &Dispatcher,
        source: &OrderSource,
        keys: &[String],
        values: &DashMap<String, String>,
        lock: &DrainLock,
        interval: Duration,
    ) -> Result<()> {
        let mut sequence: u64 = 0;
        loop {
            lock.check()?;

            let key = {
                let mut rng = rand::thread_rng();
                keys.choose(&mut rng).cloned()
            };
            let Some(key) = key else {
                return Ok(());
            };
            sequence += 1;
            let value = format!("{}-{}", source.id(), sequence);

            let ack = dispatcher
                .write(
                    KvWrite::put(key.clone(), value.clone()),
                    source.check_in("continuous_insert"),
                )
                .await?;
            debug!("Inserted {} at {}", key, ack.timestamp);
            values.insert(key, value);

            lock.nap(interval).await?;
        }
    }

    /// The last value written for each key so far.
    pub fn values_inserted(&self) -> BTreeMap<String, String> {
        self.values_inserted
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drains the loop and returns everything it wrote. Idempotent.
    pub async fn stop(&mut self) -> Result<BTreeMap<String, String>> {
        self.drainer.drain().await;
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(result) => result?,
                Err(e) => warn!("Continuous inserter task failed: {}", e),
            }
        }
        Ok(self.values_inserted())
    }

    /// Reads every inserted key back through `dispatcher` and returns the keys whose
    /// value differs from the last one written.
    pub async fn validate(&self, dispatcher: &Dispatcher) -> Result<Vec<String>> {
        let expected = self.values_inserted();
        let keys = expected.keys().cloned().collect();
        let found = dispatcher
            .read(KvRead::Keys(keys), OrderToken::unordered())
            .await?
            .values;

        Ok(expected
            .into_iter()
            .filter(|(key, value)| found.get(key) != Some(value))
            .map(|(key, _)| key)
            .collect())
    }
}

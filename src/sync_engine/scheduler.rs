//! 파티션 스케줄러
//!
//! Runs one `PartitionWorker` per partition with at most `max_workers`
//! of them active. A failing or panicking worker is recorded and the
//! remaining partitions keep going.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, info_span};

use crate::domain::errors::SyncError;
use crate::domain::listing::PartitionResult;
use crate::domain::services::RemoteBatchClient;
use crate::sync_engine::context::SyncContext;
use crate::sync_engine::partition_worker::{PartitionFailure, PartitionWorker};
use crate::sync_engine::reconciler::Reconciler;

/// How one partition ended.
///
/// `Failed::partial` holds the batches reconciled before the error; for a
/// panicked worker it is empty.
#[derive(Debug)]
pub enum PartitionRun {
    Completed(PartitionResult),
    Failed { partial: PartitionResult, error: SyncError },
}

impl PartitionRun {
    pub fn partition_key(&self) -> &str {
        match self {
            Self::Completed(result) | Self::Failed { partial: result, .. } => &result.partition_key,
        }
    }
}

pub struct Scheduler {
    context: Arc<SyncContext>,
    client: Arc<dyn RemoteBatchClient>,
    reconciler: Reconciler,
}

impl Scheduler {
    pub fn new(context: Arc<SyncContext>, client: Arc<dyn RemoteBatchClient>, reconciler: Reconciler) -> Self {
        Self {
            context,
            client,
            reconciler,
        }
    }

    /// Runs every partition and returns their outcomes in input order.
    pub async fn run_all(&self, partitions: Vec<(String, Vec<String>)>) -> Vec<PartitionRun> {
        if partitions.is_empty() {
            return Vec::new();
        }

        let worker_count = self.context.config().max_workers.min(partitions.len()).max(1);
        let slots = Arc::new(Semaphore::new(worker_count));
        info!("🚀 Scheduling {} partition(s) on {} worker(s)", partitions.len(), worker_count);

        let mut keys = Vec::with_capacity(partitions.len());
        let mut handles = Vec::with_capacity(partitions.len());

        for (partition_key, item_ids) in partitions {
            let slots = Arc::clone(&slots);
            let worker = PartitionWorker::new(
                Arc::clone(&self.context),
                Arc::clone(&self.client),
                self.reconciler.clone(),
            );
            let span = info_span!("partition", partition = %partition_key);
            let key = partition_key.clone();

            keys.push(partition_key);
            handles.push(tokio::spawn(
                async move {
                    // never closed
                    let _slot = slots.acquire_owned().await.ok();
                    worker.run(&key, item_ids).await
                }
                .instrument(span),
            ));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(keys)
            .map(|(joined, partition_key)| match joined {
                Ok(Ok(result)) => PartitionRun::Completed(result),
                Ok(Err(PartitionFailure { partial, error })) => {
                    error!(
                        "❌ {}: partition failed after {} listing(s): {}",
                        partition_key, partial.deleted_count, error
                    );
                    PartitionRun::Failed { partial, error }
                }
                Err(join_error) => {
                    error!("💥 {}: worker panicked: {}", partition_key, join_error);
                    PartitionRun::Failed {
                        partial: PartitionResult::empty(&partition_key),
                        error: SyncError::PartitionPanicked {
                            partition: partition_key,
                            message: join_error.to_string(),
                        },
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::RemoteCallError;
    use crate::domain::listing::RemoteItemResult;
    use crate::domain::services::LocalListingStore;
    use crate::sync_engine::config::EngineConfig;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks the peak number of partitions inside the remote call.
    #[derive(Default)]
    struct ConcurrencyMeter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RemoteBatchClient for ConcurrencyMeter {
        async fn terminate_batch(
            &self,
            partition_key: &str,
            item_ids: &[String],
        ) -> Result<Vec<RemoteItemResult>, RemoteCallError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if partition_key == "panics" {
                panic!("simulated worker crash");
            }
            Ok(item_ids.iter().map(RemoteItemResult::ok).collect())
        }
    }

    /// Fails local deletes for one partition only.
    struct PickyStore;

    #[async_trait]
    impl LocalListingStore for PickyStore {
        async fn delete(&self, partition_key: &str, _item_id: &str) -> Result<u64> {
            if partition_key == "broken" {
                bail!("disk I/O error");
            }
            Ok(1)
        }
    }

    fn scheduler(config: EngineConfig) -> (Scheduler, Arc<ConcurrencyMeter>) {
        let context = SyncContext::new(config).unwrap();
        let meter = Arc::new(ConcurrencyMeter::default());
        let scheduler = Scheduler::new(context, meter.clone(), Reconciler::new(Arc::new(PickyStore)));
        (scheduler, meter)
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            base_pacing_delay_ms: 1,
            pacing_jitter_ms: 0,
            ..EngineConfig::default()
        }
    }

    fn partition(key: &str, count: u32) -> (String, Vec<String>) {
        (key.to_string(), (1..=count).map(|n| format!("{key}-{n}")).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_gate_serializes_remote_calls() {
        let (scheduler, meter) = scheduler(EngineConfig {
            max_workers: 4,
            ..fast_config()
        });

        let runs = scheduler
            .run_all(vec![partition("a", 25), partition("b", 25), partition("c", 5)])
            .await;

        assert_eq!(runs.len(), 3);
        assert_eq!(meter.peak.load(Ordering::SeqCst), 1);
        for run in &runs {
            assert!(matches!(run, PartitionRun::Completed(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wider_gate_allows_parallel_calls() {
        let (scheduler, meter) = scheduler(EngineConfig {
            max_workers: 2,
            global_remote_concurrency: 2,
            ..fast_config()
        });

        scheduler.run_all(vec![partition("a", 30), partition("b", 30)]).await;

        assert_eq!(meter.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_panicked_partitions_are_isolated() {
        let (scheduler, _meter) = scheduler(fast_config());

        let runs = scheduler
            .run_all(vec![partition("broken", 3), partition("panics", 3), partition("fine", 12)])
            .await;

        let keys: Vec<_> = runs.iter().map(PartitionRun::partition_key).collect();
        assert_eq!(keys, vec!["broken", "panics", "fine"]);

        assert!(matches!(&runs[0], PartitionRun::Failed { error: SyncError::LocalStore(_), .. }));
        assert!(matches!(&runs[1], PartitionRun::Failed { error: SyncError::PartitionPanicked { .. }, .. }));
        match &runs[2] {
            PartitionRun::Completed(result) => assert_eq!(result.deleted_count, 12),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_partitions_is_a_no_op() {
        let (scheduler, meter) = scheduler(fast_config());
        assert!(scheduler.run_all(Vec::new()).await.is_empty());
        assert_eq!(meter.peak.load(Ordering::SeqCst), 0);
    }
}

//! 파티션 워커 - 한 계정의 후보 목록을 배치 단위로 종료 처리
//!
//! Drives one partition to completion or early abort:
//! 1. drop deferred items
//! 2. wait while the circuit breaker halts everything
//! 3. take the next batch, pass the rate limiter and the global remote gate
//! 4. classify, then either abort on throttling or reconcile and continue

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::domain::errors::{RemoteCallError, SyncError};
use crate::domain::listing::PartitionResult;
use crate::domain::services::RemoteBatchClient;
use crate::sync_engine::batch::{BatchOutcome, classify_batch, take_batch};
use crate::sync_engine::context::SyncContext;
use crate::sync_engine::reconciler::Reconciler;

/// A partition that stopped on an error, with what it finished before that.
#[derive(Debug)]
pub struct PartitionFailure {
    pub partial: PartitionResult,
    pub error: SyncError,
}

pub struct PartitionWorker {
    context: Arc<SyncContext>,
    client: Arc<dyn RemoteBatchClient>,
    reconciler: Reconciler,
}

impl PartitionWorker {
    pub fn new(context: Arc<SyncContext>, client: Arc<dyn RemoteBatchClient>, reconciler: Reconciler) -> Self {
        Self {
            context,
            client,
            reconciler,
        }
    }

    /// Runs the partition. On failure the counts of the batches that were
    /// already reconciled travel with the error.
    pub async fn run(&self, partition_key: &str, item_ids: Vec<String>) -> Result<PartitionResult, PartitionFailure> {
        let mut result = PartitionResult::empty(partition_key);
        match self.drive(partition_key, item_ids, &mut result).await {
            Ok(()) => Ok(result),
            Err(error) => Err(PartitionFailure { partial: result, error }),
        }
    }

    async fn drive(
        &self,
        partition_key: &str,
        item_ids: Vec<String>,
        result: &mut PartitionResult,
    ) -> Result<(), SyncError> {
        let defer = self.context.defer_registry();
        let max_batch_size = self.context.config().max_batch_size;

        let mut pending: VecDeque<String> = item_ids
            .into_iter()
            .filter(|item_id| !defer.is_deferred(item_id))
            .collect();

        if pending.is_empty() {
            info!("🧾 {}: nothing to end this run (deferred only or no candidates)", partition_key);
            return Ok(());
        }

        info!("▶ {}: ending {} listing(s) (batch size {})", partition_key, pending.len(), max_batch_size);

        while !pending.is_empty() {
            if self.context.is_cancelled() {
                warn!("🛑 {}: cancelled with {} listing(s) left", partition_key, pending.len());
                result.was_cancelled = true;
                break;
            }

            if self.context.circuit_breaker().should_halt() {
                self.wait_out_halt(partition_key).await;
                continue;
            }

            let batch = take_batch(&mut pending, max_batch_size, |item_id| defer.is_deferred(item_id));
            if batch.is_empty() {
                break;
            }

            let outcome = self.execute_batch(partition_key, &batch).await;
            let succeeded = outcome.succeeded_ids();

            if outcome.is_rate_limited() {
                self.on_throttled(partition_key, &outcome);

                // successes in the same batch are already ended remotely
                if !succeeded.is_empty() {
                    result.rows_affected += self.reconciler.reconcile(partition_key, &succeeded).await?;
                    result.deleted_count += succeeded.len() as u64;
                }
                result.was_rate_limited = true;
                info!(
                    "⏹ {}: rate limited, stopping this partition for the run ({} listing(s) left)",
                    partition_key,
                    pending.len()
                );
                return Ok(());
            }

            self.context.rate_limiter().on_normal_outcome();

            if !succeeded.is_empty() {
                info!("✅ {}: remote end confirmed for {:?}", partition_key, succeeded);
                result.rows_affected += self.reconciler.reconcile(partition_key, &succeeded).await?;
                result.deleted_count += succeeded.len() as u64;
            }

            let failed = outcome.failed();
            if !failed.is_empty() {
                let sample: Vec<_> = failed
                    .iter()
                    .take(2)
                    .map(|o| format!("{}({})", o.item_id, o.error_code.as_deref().unwrap_or("-")))
                    .collect();
                warn!("🚫 {}: {} listing(s) failed, e.g. {:?}", partition_key, failed.len(), sample);
            }
        }

        info!("🧾 {}: {} listing(s) ended in total", partition_key, result.deleted_count);
        Ok(())
    }

    /// Sleeps in bounded steps while the breaker is open, waking early on cancel.
    async fn wait_out_halt(&self, partition_key: &str) {
        let remaining = self.context.circuit_breaker().halt_remaining();
        let nap = remaining.min(self.context.config().halt_poll_interval());
        if nap.is_zero() {
            return;
        }

        info!("⏸ {}: global halt for rate protection, {:?} remaining", partition_key, remaining);
        tokio::select! {
            () = sleep(nap) => {}
            () = self.context.cancellation_token().cancelled() => {}
        }
    }

    async fn execute_batch(&self, partition_key: &str, batch: &[String]) -> BatchOutcome {
        self.context.rate_limiter().before_call().await;

        let response = match self.context.remote_permits().acquire().await {
            Ok(_permit) => {
                // the previous permit holder may have been throttled while we queued
                self.context.rate_limiter().wait_backoff().await;
                debug!("📤 {}: sending batch of {}", partition_key, batch.len());
                timeout(
                    self.context.config().remote_call_timeout(),
                    self.client.terminate_batch(partition_key, batch),
                )
                .await
                .unwrap_or(Err(RemoteCallError::Timeout))
            }
            Err(e) => Err(RemoteCallError::Transport(format!("remote call gate closed: {e}"))),
        };

        let config = self.context.config();
        classify_batch(batch, response, |code| config.is_rate_limit_code(code))
    }

    fn on_throttled(&self, partition_key: &str, outcome: &BatchOutcome) {
        let throttled = outcome.rate_limited_ids();
        self.context
            .defer_registry()
            .mark_deferred(&throttled, self.context.config().defer_window());
        self.context.rate_limiter().on_rate_limited();
        if self.context.circuit_breaker().note_rate_limit_hit() {
            warn!("🧯 {}: tripped the global circuit breaker", partition_key);
        }
    }
}

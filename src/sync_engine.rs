//! 레이트 적응형 일괄 종료 동기화 엔진
//!
//! Selects aged listings once, ends them remotely in per-account batches
//! and deletes local rows only for remotely confirmed items.
//!
//! Shared run state (rate limiter, circuit breaker, defer registry and the
//! global remote-call gate) lives in one [`SyncContext`] per run.

pub mod batch;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod defer_registry;
pub mod partition_worker;
pub mod rate_limiter;
pub mod reconciler;
pub mod reporter;
pub mod scheduler;

pub use circuit_breaker::CircuitBreaker;
pub use config::EngineConfig;
pub use context::SyncContext;
pub use defer_registry::DeferRegistry;
pub use partition_worker::{PartitionFailure, PartitionWorker};
pub use rate_limiter::RateLimiter;
pub use reconciler::Reconciler;
pub use reporter::{FailedPartition, RunSummary};
pub use scheduler::{PartitionRun, Scheduler};

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::errors::SyncError;
use crate::domain::listing::{CandidateItem, group_by_partition};
use crate::domain::services::{CandidateSelector, LocalListingStore, RemoteBatchClient};

pub struct SyncEngine {
    context: Arc<SyncContext>,
    selector: Arc<dyn CandidateSelector>,
    client: Arc<dyn RemoteBatchClient>,
    store: Arc<dyn LocalListingStore>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        selector: Arc<dyn CandidateSelector>,
        client: Arc<dyn RemoteBatchClient>,
        store: Arc<dyn LocalListingStore>,
    ) -> Result<Self, SyncError> {
        Ok(Self::with_context(SyncContext::new(config)?, selector, client, store))
    }

    /// Uses an existing context, e.g. to carry deferrals into a second pass.
    pub fn with_context(
        context: Arc<SyncContext>,
        selector: Arc<dyn CandidateSelector>,
        client: Arc<dyn RemoteBatchClient>,
        store: Arc<dyn LocalListingStore>,
    ) -> Self {
        Self {
            context,
            selector,
            client,
            store,
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    /// Token that stops every partition before its next batch once cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.cancellation_token().clone()
    }

    /// Selects candidates and runs them to completion.
    ///
    /// Only a failed selection is an error; every partition level problem
    /// ends up in the returned summary.
    pub async fn run(&self) -> Result<RunSummary, SyncError> {
        let candidates = self.selector.select_candidates().await.map_err(|e| {
            error!("❌ Candidate selection failed: {:#}", e);
            SyncError::CandidateSelection(format!("{e:#}"))
        })?;

        Ok(self.run_candidates(candidates).await)
    }

    pub async fn run_candidates(&self, candidates: Vec<CandidateItem>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let partitions = group_by_partition(candidates);
        let total: usize = partitions.iter().map(|(_, ids)| ids.len()).sum();
        info!(%run_id, "🎯 {} candidate(s) across {} partition(s)", total, partitions.len());
        for (partition_key, ids) in &partitions {
            info!("🎯 {}: {} candidate(s)", partition_key, ids.len());
        }

        let scheduler = Scheduler::new(
            Arc::clone(&self.context),
            Arc::clone(&self.client),
            Reconciler::new(Arc::clone(&self.store)),
        );
        let runs = scheduler.run_all(partitions).await;

        // keep long-lived contexts bounded between runs
        self.context.defer_registry().purge_expired();

        RunSummary::from_runs(run_id, started_at, clock.elapsed(), runs)
    }
}

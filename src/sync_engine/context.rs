//! Run-scoped shared state
//!
//! One `SyncContext` is built per run and handed to every partition worker,
//! so independent runs (and tests) never share limiter or breaker state.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::SyncError;
use crate::sync_engine::circuit_breaker::CircuitBreaker;
use crate::sync_engine::config::EngineConfig;
use crate::sync_engine::defer_registry::DeferRegistry;
use crate::sync_engine::rate_limiter::RateLimiter;

#[derive(Debug)]
pub struct SyncContext {
    config: EngineConfig,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    defer_registry: DeferRegistry,
    /// Bounds in-flight remote calls across all partitions
    remote_permits: Semaphore,
    cancellation_token: CancellationToken,
}

impl SyncContext {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, SyncError> {
        config.validate()?;

        Ok(Arc::new(Self {
            rate_limiter: RateLimiter::new(&config),
            circuit_breaker: CircuitBreaker::new(&config),
            defer_registry: DeferRegistry::new(config.defer_purge_threshold),
            remote_permits: Semaphore::new(config.global_remote_concurrency),
            cancellation_token: CancellationToken::new(),
            config,
        }))
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub const fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub const fn defer_registry(&self) -> &DeferRegistry {
        &self.defer_registry
    }

    pub const fn remote_permits(&self) -> &Semaphore {
        &self.remote_permits
    }

    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Stops every partition before its next batch.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

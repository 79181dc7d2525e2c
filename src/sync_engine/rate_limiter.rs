//! 전역 레이트 리미터
//!
//! Every remote call passes through `before_call`. A throttling signal from
//! any partition pushes the shared `backoff_until` forward and doubles the
//! backoff; normal outcomes let it decay slowly back toward the base.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};

use crate::sync_engine::config::EngineConfig;

#[derive(Debug)]
struct RateState {
    backoff_until: Option<Instant>,
    backoff_seconds: f64,
}

#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateState>,
    pacing: Duration,
    jitter: Duration,
    base_seconds: f64,
    cap_seconds: f64,
    decay_factor: f64,
}

impl RateLimiter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(RateState {
                backoff_until: None,
                backoff_seconds: config.backoff_base_seconds,
            }),
            pacing: config.base_pacing_delay(),
            jitter: config.pacing_jitter(),
            base_seconds: config.backoff_base_seconds,
            cap_seconds: config.backoff_cap_seconds,
            decay_factor: config.backoff_decay_factor,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits out any active backoff, then applies the pacing delay plus jitter.
    pub async fn before_call(&self) {
        self.wait_backoff().await;
        sleep(self.pacing + self.sample_jitter()).await;
    }

    /// Returns once `now >= backoff_until`, re-reading the deadline after every
    /// sleep since another caller may have pushed it further out.
    ///
    /// The lock is only held to read the deadline; sleeping happens outside it.
    pub async fn wait_backoff(&self) {
        loop {
            let until = self.lock().backoff_until;
            match until {
                Some(deadline) if Instant::now() < deadline => {
                    debug!(
                        "⏳ Backoff active, waiting {:?}",
                        deadline.saturating_duration_since(Instant::now())
                    );
                    sleep_until(deadline).await;
                }
                _ => break,
            }
        }
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=max_ms))
        }
    }

    /// Records a throttling signal. Returns the backoff that was applied.
    pub fn on_rate_limited(&self) -> Duration {
        let mut state = self.lock();
        let applied = Duration::from_secs_f64(state.backoff_seconds);
        let deadline = Instant::now() + applied;

        state.backoff_until = Some(state.backoff_until.map_or(deadline, |current| current.max(deadline)));
        state.backoff_seconds = (state.backoff_seconds * 2.0).min(self.cap_seconds);

        warn!(
            "🐢 Rate limited: backing off {:?}, next backoff {:.1}s",
            applied, state.backoff_seconds
        );
        applied
    }

    /// Decays the backoff toward the base value after a non-throttled call.
    pub fn on_normal_outcome(&self) {
        let mut state = self.lock();
        state.backoff_seconds = (state.backoff_seconds * self.decay_factor).max(self.base_seconds);
    }

    pub fn backoff_seconds(&self) -> f64 {
        self.lock().backoff_seconds
    }

    pub fn backoff_until(&self) -> Option<Instant> {
        self.lock().backoff_until
    }
}

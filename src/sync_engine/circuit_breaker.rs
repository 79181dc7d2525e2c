//! Burst-detecting circuit breaker
//!
//! Collects rate limit hits from every partition in one sliding window.
//! When `burst_threshold` hits land inside `window`, all partitions are halted
//! for `min(halt_base * 2^(trip_count - 1), halt_cap)`. Each poll after the
//! halt has expired forgives one trip.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::sync_engine::config::EngineConfig;

#[derive(Debug, Default)]
struct CircuitState {
    recent_hits: VecDeque<Instant>,
    trip_count: u32,
    halt_until: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    window: Duration,
    burst_threshold: usize,
    halt_base: Duration,
    halt_cap: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(CircuitState::default()),
            window: config.circuit_window(),
            burst_threshold: config.circuit_burst_threshold,
            halt_base: config.circuit_halt_base(),
            halt_cap: config.circuit_halt_cap(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Halt length for the given (1-based) trip number.
    pub fn halt_duration_for_trip(&self, trip: u32) -> Duration {
        let factor = 2_u32.saturating_pow(trip.saturating_sub(1));
        self.halt_base.saturating_mul(factor).min(self.halt_cap)
    }

    /// Records one rate limit hit. Returns `true` when this hit tripped the breaker.
    pub fn note_rate_limit_hit(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();

        state.recent_hits.push_back(now);
        while let Some(&oldest) = state.recent_hits.front() {
            if now.saturating_duration_since(oldest) > self.window {
                state.recent_hits.pop_front();
            } else {
                break;
            }
        }

        if state.recent_hits.len() < self.burst_threshold {
            return false;
        }

        state.trip_count += 1;
        let halt = self.halt_duration_for_trip(state.trip_count);
        let deadline = now + halt;
        state.halt_until = Some(state.halt_until.map_or(deadline, |current| current.max(deadline)));

        warn!(
            "🧯 Rate limit burst detected ({} hits in {:?}), halting all partitions for {:?} (trip #{})",
            state.recent_hits.len(),
            self.window,
            halt,
            state.trip_count
        );
        true
    }

    /// `true` while a halt is active.
    ///
    /// Once the halt has expired every call forgives one trip, so sensitivity
    /// recovers slowly instead of resetting at once.
    pub fn should_halt(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        let halted = state.halt_until.is_some_and(|until| now < until);

        if !halted && state.trip_count > 0 {
            state.trip_count -= 1;
        }
        halted
    }

    pub fn halt_remaining(&self) -> Duration {
        self.lock()
            .halt_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(Instant::now()))
    }

    pub fn trip_count(&self) -> u32 {
        self.lock().trip_count
    }
}

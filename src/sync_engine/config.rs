//! 동기화 엔진 설정
//!
//! All pacing, backoff, deferral and circuit breaker knobs of a run.
//! Stored as plain numbers so the config file stays readable; the helper
//! methods hand out `Duration`s.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::SyncError;

/// Default engine values, mirroring the production deployment.
pub mod defaults {
    /// Accounts processed in parallel
    pub const MAX_WORKERS: usize = 2;

    /// EndItems accepts at most 10 containers per call
    pub const MAX_BATCH_SIZE: usize = 10;
    pub const REMOTE_BATCH_LIMIT: usize = 10;

    pub const BASE_PACING_DELAY_MS: u64 = 600;
    pub const PACING_JITTER_MS: u64 = 50;

    pub const BACKOFF_BASE_SECONDS: f64 = 60.0;
    pub const BACKOFF_CAP_SECONDS: f64 = 300.0;
    pub const BACKOFF_DECAY_FACTOR: f64 = 0.75;

    /// Rate limited listings are left alone for 30 minutes
    pub const DEFER_WINDOW_SECONDS: u64 = 1800;
    pub const DEFER_PURGE_THRESHOLD: usize = 10_000;

    pub const CIRCUIT_WINDOW_SECONDS: f64 = 5.0;
    pub const CIRCUIT_BURST_THRESHOLD: usize = 4;
    pub const CIRCUIT_HALT_BASE_SECONDS: u64 = 120;
    pub const CIRCUIT_HALT_CAP_SECONDS: u64 = 900;
    pub const HALT_POLL_INTERVAL_MS: u64 = 5000;

    /// Remote calls are serialized across all accounts
    pub const GLOBAL_REMOTE_CONCURRENCY: usize = 1;
    pub const REMOTE_CALL_TIMEOUT_SECONDS: u64 = 45;

    pub const RATE_LIMIT_CODES: &[&str] = &["518", "429"];

    /// Ceiling for every configured wait; deadlines are computed as `Instant + Duration`
    pub const MAX_WAIT_SECONDS: u64 = 86_400;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub max_batch_size: usize,
    /// Hard limit of the remote API; `max_batch_size` may not exceed it
    pub remote_batch_limit: usize,
    pub base_pacing_delay_ms: u64,
    pub pacing_jitter_ms: u64,
    pub backoff_base_seconds: f64,
    pub backoff_cap_seconds: f64,
    pub backoff_decay_factor: f64,
    pub defer_window_seconds: u64,
    pub defer_purge_threshold: usize,
    pub circuit_window_seconds: f64,
    pub circuit_burst_threshold: usize,
    pub circuit_halt_base_seconds: u64,
    pub circuit_halt_cap_seconds: u64,
    pub halt_poll_interval_ms: u64,
    pub global_remote_concurrency: usize,
    pub remote_call_timeout_seconds: u64,
    /// Error codes that mean "throttled" rather than "rejected"
    pub rate_limit_codes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: defaults::MAX_WORKERS,
            max_batch_size: defaults::MAX_BATCH_SIZE,
            remote_batch_limit: defaults::REMOTE_BATCH_LIMIT,
            base_pacing_delay_ms: defaults::BASE_PACING_DELAY_MS,
            pacing_jitter_ms: defaults::PACING_JITTER_MS,
            backoff_base_seconds: defaults::BACKOFF_BASE_SECONDS,
            backoff_cap_seconds: defaults::BACKOFF_CAP_SECONDS,
            backoff_decay_factor: defaults::BACKOFF_DECAY_FACTOR,
            defer_window_seconds: defaults::DEFER_WINDOW_SECONDS,
            defer_purge_threshold: defaults::DEFER_PURGE_THRESHOLD,
            circuit_window_seconds: defaults::CIRCUIT_WINDOW_SECONDS,
            circuit_burst_threshold: defaults::CIRCUIT_BURST_THRESHOLD,
            circuit_halt_base_seconds: defaults::CIRCUIT_HALT_BASE_SECONDS,
            circuit_halt_cap_seconds: defaults::CIRCUIT_HALT_CAP_SECONDS,
            halt_poll_interval_ms: defaults::HALT_POLL_INTERVAL_MS,
            global_remote_concurrency: defaults::GLOBAL_REMOTE_CONCURRENCY,
            remote_call_timeout_seconds: defaults::REMOTE_CALL_TIMEOUT_SECONDS,
            rate_limit_codes: defaults::RATE_LIMIT_CODES
                .iter()
                .map(|code| (*code).to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        let fail = |message: &str| Err(SyncError::Configuration(message.to_string()));

        if self.max_workers == 0 {
            return fail("max_workers must be greater than 0");
        }
        if self.max_batch_size == 0 {
            return fail("max_batch_size must be greater than 0");
        }
        if self.max_batch_size > self.remote_batch_limit {
            return fail("max_batch_size cannot exceed remote_batch_limit");
        }
        if self.global_remote_concurrency == 0 {
            return fail("global_remote_concurrency must be greater than 0");
        }
        if !(self.backoff_base_seconds.is_finite() && self.backoff_base_seconds > 0.0) {
            return fail("backoff_base_seconds must be a positive number");
        }
        if !self.backoff_cap_seconds.is_finite() || self.backoff_cap_seconds < self.backoff_base_seconds {
            return fail("backoff_cap_seconds cannot be lower than backoff_base_seconds");
        }
        if !(self.backoff_decay_factor > 0.0 && self.backoff_decay_factor < 1.0) {
            return fail("backoff_decay_factor must be between 0 and 1 (exclusive)");
        }
        if !(self.circuit_window_seconds.is_finite() && self.circuit_window_seconds > 0.0) {
            return fail("circuit_window_seconds must be a positive number");
        }
        if self.circuit_burst_threshold == 0 {
            return fail("circuit_burst_threshold must be greater than 0");
        }
        if self.circuit_halt_cap_seconds < self.circuit_halt_base_seconds {
            return fail("circuit_halt_cap_seconds cannot be lower than circuit_halt_base_seconds");
        }
        if self.halt_poll_interval_ms == 0 {
            return fail("halt_poll_interval_ms must be greater than 0");
        }
        if self.remote_call_timeout_seconds == 0 {
            return fail("remote_call_timeout_seconds must be greater than 0");
        }

        let ceiling = defaults::MAX_WAIT_SECONDS;
        let ceiling_ms = ceiling * 1000;
        let too_long = [
            ("backoff_cap_seconds", self.backoff_cap_seconds > ceiling as f64),
            ("circuit_window_seconds", self.circuit_window_seconds > ceiling as f64),
            ("circuit_halt_cap_seconds", self.circuit_halt_cap_seconds > ceiling),
            ("defer_window_seconds", self.defer_window_seconds > ceiling),
            ("remote_call_timeout_seconds", self.remote_call_timeout_seconds > ceiling),
            ("halt_poll_interval_ms", self.halt_poll_interval_ms > ceiling_ms),
            ("base_pacing_delay_ms", self.base_pacing_delay_ms > ceiling_ms),
            ("pacing_jitter_ms", self.pacing_jitter_ms > ceiling_ms),
        ];
        if let Some((name, _)) = too_long.iter().find(|(_, exceeded)| *exceeded) {
            return Err(SyncError::Configuration(format!(
                "{name} cannot exceed {ceiling} seconds"
            )));
        }

        Ok(())
    }

    pub const fn base_pacing_delay(&self) -> Duration {
        Duration::from_millis(self.base_pacing_delay_ms)
    }

    pub const fn pacing_jitter(&self) -> Duration {
        Duration::from_millis(self.pacing_jitter_ms)
    }

    pub const fn defer_window(&self) -> Duration {
        Duration::from_secs(self.defer_window_seconds)
    }

    pub fn circuit_window(&self) -> Duration {
        Duration::from_secs_f64(self.circuit_window_seconds)
    }

    pub const fn circuit_halt_base(&self) -> Duration {
        Duration::from_secs(self.circuit_halt_base_seconds)
    }

    pub const fn circuit_halt_cap(&self) -> Duration {
        Duration::from_secs(self.circuit_halt_cap_seconds)
    }

    pub const fn halt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.halt_poll_interval_ms)
    }

    pub const fn remote_call_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_call_timeout_seconds)
    }

    pub fn is_rate_limit_code(&self, code: &str) -> bool {
        self.rate_limit_codes.iter().any(|known| known == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_validation() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.global_remote_concurrency, 1);
        assert!(config.is_rate_limit_code("518"));
        assert!(config.is_rate_limit_code("429"));
        assert!(!config.is_rate_limit_code("1047"));
    }

    #[test]
    fn test_batch_size_above_remote_limit_is_rejected() {
        let config = EngineConfig {
            max_batch_size: 11,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for config in [
            EngineConfig { max_workers: 0, ..EngineConfig::default() },
            EngineConfig { max_batch_size: 0, ..EngineConfig::default() },
            EngineConfig { global_remote_concurrency: 0, ..EngineConfig::default() },
            EngineConfig { circuit_burst_threshold: 0, ..EngineConfig::default() },
        ] {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_backoff_cap_below_base_is_rejected() {
        let config = EngineConfig {
            backoff_base_seconds: 60.0,
            backoff_cap_seconds: 30.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = EngineConfig::default();
        assert_eq!(config.base_pacing_delay(), Duration::from_millis(600));
        assert_eq!(config.defer_window(), Duration::from_secs(1800));
        assert_eq!(config.circuit_window(), Duration::from_secs(5));
        assert_eq!(config.circuit_halt_cap(), Duration::from_secs(900));
    }

    #[rstest]
    #[case::defer_window(EngineConfig { defer_window_seconds: u64::MAX, ..EngineConfig::default() }, "defer_window_seconds")]
    #[case::halt_cap(EngineConfig { circuit_halt_cap_seconds: 86_401, ..EngineConfig::default() }, "circuit_halt_cap_seconds")]
    #[case::backoff_cap(EngineConfig { backoff_cap_seconds: 1e30, ..EngineConfig::default() }, "backoff_cap_seconds")]
    #[case::timeout(EngineConfig { remote_call_timeout_seconds: u64::MAX, ..EngineConfig::default() }, "remote_call_timeout_seconds")]
    fn test_waits_beyond_one_day_are_rejected(#[case] config: EngineConfig, #[case] field: &str) {
        match config.validate() {
            Err(SyncError::Configuration(message)) => assert!(message.contains(field), "{message}"),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_one_day_waits_are_accepted() {
        let config = EngineConfig {
            defer_window_seconds: 86_400,
            circuit_halt_cap_seconds: 86_400,
            backoff_cap_seconds: 86_400.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}

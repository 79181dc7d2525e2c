//! Per-listing deferral after a throttling signal
//!
//! A rate limited listing is kept out of every later batch until its
//! deferral expires. Expired entries are reclaimed once the map grows past
//! the purge threshold.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct DeferRegistry {
    entries: Mutex<HashMap<String, Instant>>,
    purge_threshold: usize,
}

impl DeferRegistry {
    pub fn new(purge_threshold: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            purge_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Defers every id until `now + duration`. Returns that deadline.
    pub fn mark_deferred(&self, item_ids: &[String], duration: Duration) -> Instant {
        let until = Instant::now() + duration;
        let mut entries = self.lock();

        for item_id in item_ids {
            entries.insert(item_id.clone(), until);
        }

        if entries.len() > self.purge_threshold {
            let now = Instant::now();
            entries.retain(|_, deadline| now < *deadline);
        }

        if !item_ids.is_empty() {
            info!("⏸ defer: {} item(s) for {:?}", item_ids.len(), duration);
        }
        until
    }

    pub fn is_deferred(&self, item_id: &str) -> bool {
        self.lock()
            .get(item_id)
            .is_some_and(|until| Instant::now() < *until)
    }

    /// Deadline of an active deferral, if any.
    pub fn deferred_until(&self, item_id: &str) -> Option<Instant> {
        let now = Instant::now();
        self.lock().get(item_id).copied().filter(|until| now < *until)
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, until| now < *until);
        let purged = before - entries.len();
        if purged > 0 {
            debug!("🧹 Purged {} expired deferral(s)", purged);
        }
        purged
    }

    /// Number of tracked entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for DeferRegistry {
    fn default() -> Self {
        Self::new(crate::sync_engine::config::defaults::DEFER_PURGE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_until_window_elapses() {
        let registry = DeferRegistry::default();
        registry.mark_deferred(&ids(&["11", "12"]), Duration::from_secs(1800));

        assert!(registry.is_deferred("11"));
        assert!(registry.is_deferred("12"));
        assert!(!registry.is_deferred("13"));

        advance(Duration::from_secs(1799)).await;
        assert!(registry.is_deferred("11"));

        advance(Duration::from_secs(1)).await;
        assert!(!registry.is_deferred("11"));
        assert!(registry.deferred_until("11").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_again_extends_deadline() {
        let registry = DeferRegistry::default();
        registry.mark_deferred(&ids(&["1"]), Duration::from_secs(10));
        advance(Duration::from_secs(5)).await;
        registry.mark_deferred(&ids(&["1"]), Duration::from_secs(10));

        advance(Duration::from_secs(8)).await;
        assert!(registry.is_deferred("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_reclaims_memory() {
        let registry = DeferRegistry::default();
        registry.mark_deferred(&ids(&["a", "b"]), Duration::from_secs(1));
        registry.mark_deferred(&ids(&["c"]), Duration::from_secs(100));
        assert_eq!(registry.len(), 3);

        advance(Duration::from_secs(2)).await;
        assert_eq!(registry.purge_expired(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_deferred("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_triggers_automatic_purge() {
        let registry = DeferRegistry::new(2);
        registry.mark_deferred(&ids(&["a", "b"]), Duration::from_secs(1));
        advance(Duration::from_secs(2)).await;

        registry.mark_deferred(&ids(&["c"]), Duration::from_secs(60));

        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_marks_are_all_recorded() {
        let registry = std::sync::Arc::new(DeferRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = std::sync::Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.mark_deferred(&[format!("item-{n}")], Duration::from_secs(60));
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 8);
        assert!((0..8).all(|n| registry.is_deferred(&format!("item-{n}"))));
    }
}

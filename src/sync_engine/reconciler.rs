//! Local reconciliation of remotely confirmed terminations

use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::errors::SyncError;
use crate::domain::services::LocalListingStore;

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LocalListingStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LocalListingStore>) -> Self {
        Self { store }
    }

    /// Deletes the confirmed ids of one partition and returns the rows removed.
    ///
    /// Already absent rows are not an error; the count may therefore be lower
    /// than `item_ids.len()`.
    pub async fn reconcile(&self, partition_key: &str, item_ids: &[String]) -> Result<u64, SyncError> {
        if item_ids.is_empty() {
            return Ok(0);
        }

        let affected = self
            .store
            .delete_many(partition_key, item_ids)
            .await
            .map_err(|e| SyncError::LocalStore(format!("{partition_key}: {e:#}")))?;

        if affected < item_ids.len() as u64 {
            warn!(
                "⚠️ {}: {} of {} confirmed listing(s) were already gone locally",
                partition_key,
                item_ids.len() as u64 - affected,
                item_ids.len()
            );
        }
        info!("✅ {}: local delete {} row(s) done", partition_key, affected);
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct SetStore {
        rows: Mutex<HashSet<(String, String)>>,
    }

    #[async_trait]
    impl LocalListingStore for SetStore {
        async fn delete(&self, partition_key: &str, item_id: &str) -> Result<u64> {
            let removed = self
                .rows
                .lock()
                .unwrap()
                .remove(&(partition_key.to_string(), item_id.to_string()));
            Ok(u64::from(removed))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl LocalListingStore for BrokenStore {
        async fn delete(&self, _partition_key: &str, _item_id: &str) -> Result<u64> {
            bail!("database is locked")
        }
    }

    fn store_with(rows: &[(&str, &str)]) -> Arc<SetStore> {
        Arc::new(SetStore {
            rows: Mutex::new(rows.iter().map(|(a, b)| ((*a).to_string(), (*b).to_string())).collect()),
        })
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = store_with(&[("acc", "1"), ("acc", "2")]);
        let reconciler = Reconciler::new(store.clone());
        let ids = vec!["1".to_string(), "2".to_string()];

        assert_eq!(reconciler.reconcile("acc", &ids).await.unwrap(), 2);
        assert_eq!(reconciler.reconcile("acc", &ids).await.unwrap(), 0);
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_only_touches_its_partition() {
        let store = store_with(&[("acc", "1"), ("other", "1")]);
        let reconciler = Reconciler::new(store.clone());

        assert_eq!(reconciler.reconcile("acc", &["1".to_string()]).await.unwrap(), 1);
        assert!(store.rows.lock().unwrap().contains(&("other".to_string(), "1".to_string())));
    }

    #[test]
    fn test_reconcile_empty_list_skips_store() {
        let reconciler = Reconciler::new(Arc::new(BrokenStore));
        assert_eq!(tokio_test::block_on(reconciler.reconcile("acc", &[])).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_errors_surface_as_local_store_error() {
        let reconciler = Reconciler::new(Arc::new(BrokenStore));
        let err = reconciler.reconcile("acc", &["1".to_string()]).await.unwrap_err();
        assert!(matches!(err, SyncError::LocalStore(message) if message.contains("database is locked")));
    }
}

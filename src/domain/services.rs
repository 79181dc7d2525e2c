//! 외부 협력자 트레이트 정의
//!
//! The engine only talks to the marketplace and to the local listing table
//! through these traits, so tests and alternative backends can plug in.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::errors::RemoteCallError;
use crate::domain::listing::{CandidateItem, RemoteItemResult};

/// Loads the full eligible candidate set once per run.
#[async_trait]
pub trait CandidateSelector: Send + Sync {
    async fn select_candidates(&self) -> Result<Vec<CandidateItem>>;
}

/// Ends up to `max_batch_size` listings of one account in a single call.
///
/// An already ended listing must come back as `success = true`.
#[async_trait]
pub trait RemoteBatchClient: Send + Sync {
    async fn terminate_batch(
        &self,
        partition_key: &str,
        item_ids: &[String],
    ) -> std::result::Result<Vec<RemoteItemResult>, RemoteCallError>;
}

/// Local record removal. Deleting an absent record affects zero rows.
#[async_trait]
pub trait LocalListingStore: Send + Sync {
    async fn delete(&self, partition_key: &str, item_id: &str) -> Result<u64>;

    async fn delete_many(&self, partition_key: &str, item_ids: &[String]) -> Result<u64> {
        let mut affected = 0;
        for item_id in item_ids {
            affected += self.delete(partition_key, item_id).await?;
        }
        Ok(affected)
    }
}

//! SQLite backed listing table
//!
//! Supplies the run's candidates and removes confirmed listings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::listing::CandidateItem;
use crate::domain::services::{CandidateSelector, LocalListingStore};

pub struct SqliteListingRepository {
    pool: SqlitePool,
    min_age_days: u32,
}

impl SqliteListingRepository {
    pub fn new(pool: SqlitePool, min_age_days: u32) -> Self {
        Self { pool, min_age_days }
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Listings at least `min_age_days` calendar days old at `now`,
    /// ordered by account and then oldest first.
    pub async fn select_candidates_as_of(&self, now: DateTime<Utc>) -> Result<Vec<CandidateItem>> {
        let rows = sqlx::query(
            r"
            SELECT account, listing_id
            FROM listings
            WHERE julianday(date(?1)) - julianday(date(start_time)) >= ?2
            ORDER BY account ASC, start_time ASC
            ",
        )
        .bind(now.format("%Y-%m-%d").to_string())
        .bind(i64::from(self.min_age_days))
        .fetch_all(&self.pool)
        .await
        .context("Failed to select candidate listings")?;

        let candidates = rows
            .iter()
            .map(|row| -> Result<CandidateItem> {
                Ok(CandidateItem::new(
                    row.try_get::<String, _>("account")?,
                    row.try_get::<String, _>("listing_id")?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("🔍 {} candidate listing(s) older than {} day(s)", candidates.len(), self.min_age_days);
        Ok(candidates)
    }

    pub async fn insert_listing(&self, account: &str, listing_id: &str, start_time: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO listings (account, listing_id, start_time) VALUES (?1, ?2, ?3)")
            .bind(account)
            .bind(listing_id)
            .bind(start_time.to_rfc3339_opts(SecondsFormat::Secs, true))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert listing {account}/{listing_id}"))?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn exists(&self, account: &str, listing_id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM listings WHERE account = ?1 AND listing_id = ?2")
            .bind(account)
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl CandidateSelector for SqliteListingRepository {
    async fn select_candidates(&self) -> Result<Vec<CandidateItem>> {
        self.select_candidates_as_of(Utc::now()).await
    }
}

#[async_trait]
impl LocalListingStore for SqliteListingRepository {
    async fn delete(&self, partition_key: &str, item_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM listings WHERE account = ?1 AND listing_id = ?2")
            .bind(partition_key)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// One transaction per reconciled batch.
    async fn delete_many(&self, partition_key: &str, item_ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for item_id in item_ids {
            affected += sqlx::query("DELETE FROM listings WHERE account = ?1 AND listing_id = ?2")
                .bind(partition_key)
                .bind(item_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await.context("Failed to commit listing delete")?;
        Ok(affected)
    }
}

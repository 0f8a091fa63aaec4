use async_trait::async_trait;
use sqlx::postgres::PgPool;
use uuid::Uuid;
use wager_models::{ChainType, CollectionRetryEntry};

use super::row_mappers::FromRow;
use super::user_repo::list_deposit_addresses;
use super::RepositoryResult;

/// A deposit address the sweeper may drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTarget {
    pub user_id: Uuid,
    pub deposit_path_index: u32,
    pub address: String,
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn collection_targets(&self, chain: ChainType) -> RepositoryResult<Vec<CollectionTarget>>;

    async fn retry_entries(&self, chain: ChainType) -> RepositoryResult<Vec<CollectionRetryEntry>>;

    /// Insert or overwrite the entry for `(user_id, chain)`.
    async fn save_retry_entry(&self, entry: &CollectionRetryEntry) -> RepositoryResult<()>;

    async fn clear_retry_entry(&self, user_id: Uuid, chain: ChainType) -> RepositoryResult<()>;
}

#[derive(Clone)]
pub struct RetryQueueRepository {
    pool: PgPool,
}

impl RetryQueueRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parked entries, for operators deciding what to unpark.
    pub async fn parked(&self, chain: ChainType) -> RepositoryResult<Vec<CollectionRetryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, chain, retry_count, error_reason, next_retry_at
            FROM collection_retry_queue
            WHERE chain = $1 AND next_retry_at IS NULL
            ORDER BY updated_at
            "#,
        )
        .bind(chain.to_db_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(CollectionRetryEntry::from_row).collect()
    }
}

#[async_trait]
impl CollectionStore for RetryQueueRepository {
    async fn collection_targets(&self, chain: ChainType) -> RepositoryResult<Vec<CollectionTarget>> {
        Ok(list_deposit_addresses(&self.pool, chain)
            .await?
            .into_iter()
            .map(|row| CollectionTarget {
                user_id: row.user_id,
                deposit_path_index: row.deposit_path_index,
                address: row.address,
            })
            .collect())
    }

    async fn retry_entries(&self, chain: ChainType) -> RepositoryResult<Vec<CollectionRetryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, chain, retry_count, error_reason, next_retry_at
            FROM collection_retry_queue
            WHERE chain = $1
            "#,
        )
        .bind(chain.to_db_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(CollectionRetryEntry::from_row).collect()
    }

    async fn save_retry_entry(&self, entry: &CollectionRetryEntry) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO collection_retry_queue (
                user_id, chain, retry_count, error_reason, next_retry_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id, chain) DO UPDATE SET
                retry_count = EXCLUDED.retry_count,
                error_reason = EXCLUDED.error_reason,
                next_retry_at = EXCLUDED.next_retry_at,
                updated_at = NOW()
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.chain.to_db_string())
        .bind(entry.retry_count)
        .bind(&entry.error_reason)
        .bind(entry.next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_retry_entry(&self, user_id: Uuid, chain: ChainType) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM collection_retry_queue WHERE user_id = $1 AND chain = $2")
            .bind(user_id)
            .bind(chain.to_db_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

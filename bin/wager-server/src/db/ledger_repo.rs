use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPool, PgConnection};
use tracing::debug;
use uuid::Uuid;
use wager_models::{ChainType, LedgerEntry, LedgerEntryKind, LedgerEntryStatus};

use super::row_mappers::{FromRow, LEDGER_COLUMNS};
use super::user_repo::{list_deposit_addresses, lock_user, set_balance};
use super::{RepositoryError, RepositoryResult};

pub(crate) struct NewLedgerEntry<'a> {
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,
    pub chain: Option<ChainType>,
    pub amount: Decimal,
    pub tx_hash: Option<&'a str>,
    pub bet_id: Option<Uuid>,
    pub withdrawal_id: Option<Uuid>,
}

impl NewLedgerEntry<'_> {
    pub fn for_bet(user_id: Uuid, bet_id: Uuid, kind: LedgerEntryKind, amount: Decimal) -> Self {
        Self {
            user_id,
            kind,
            chain: None,
            amount,
            tx_hash: None,
            bet_id: Some(bet_id),
            withdrawal_id: None,
        }
    }

    pub fn for_withdrawal(
        user_id: Uuid,
        withdrawal_id: Uuid,
        chain: ChainType,
        kind: LedgerEntryKind,
        amount: Decimal,
    ) -> Self {
        Self {
            user_id,
            kind,
            chain: Some(chain),
            amount,
            tx_hash: None,
            bet_id: None,
            withdrawal_id: Some(withdrawal_id),
        }
    }
}

/// Append a ledger row. Returns `false` if `(chain, tx_hash)` was already recorded.
pub(crate) async fn insert_ledger_entry(
    conn: &mut PgConnection,
    entry: NewLedgerEntry<'_>,
) -> RepositoryResult<bool> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO platform_transactions (
            id, user_id, kind, chain, amount, tx_hash, bet_id, withdrawal_id, status, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        ON CONFLICT (chain, tx_hash) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.user_id)
    .bind(entry.kind)
    .bind(entry.chain.map(|c| c.to_db_string()))
    .bind(entry.amount)
    .bind(entry.tx_hash)
    .bind(entry.bet_id)
    .bind(entry.withdrawal_id)
    .bind(LedgerEntryStatus::Completed)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(inserted > 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositTarget {
    pub user_id: Uuid,
    pub address: String,
}

#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Every watched deposit address on `chain`
    async fn deposit_targets(&self, chain: ChainType) -> RepositoryResult<Vec<DepositTarget>>;

    async fn deposit_exists(&self, chain: ChainType, tx_hash: &str) -> RepositoryResult<bool>;

    /// Credit a deposit exactly once. Returns the new balance, or `None` if
    /// `(chain, tx_hash)` was already credited.
    async fn credit_deposit(
        &self,
        user_id: Uuid,
        chain: ChainType,
        tx_hash: &str,
        amount: Decimal,
    ) -> RepositoryResult<Option<Decimal>>;
}

#[derive(Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn entries_for_user(&self, user_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM platform_transactions WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(LedgerEntry::from_row).collect()
    }

    /// Sum of every ledger row for the user. Matches `users.balance` whenever
    /// no transaction is in flight.
    pub async fn ledger_balance(&self, user_id: Uuid) -> RepositoryResult<Decimal> {
        let sum: Option<Decimal> =
            sqlx::query_scalar("SELECT SUM(amount) FROM platform_transactions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(sum.unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl DepositStore for LedgerRepository {
    async fn deposit_targets(&self, chain: ChainType) -> RepositoryResult<Vec<DepositTarget>> {
        Ok(list_deposit_addresses(&self.pool, chain)
            .await?
            .into_iter()
            .map(|row| DepositTarget {
                user_id: row.user_id,
                address: row.address,
            })
            .collect())
    }

    async fn deposit_exists(&self, chain: ChainType, tx_hash: &str) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM platform_transactions WHERE chain = $1 AND tx_hash = $2)",
        )
        .bind(chain.to_db_string())
        .bind(tx_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn credit_deposit(
        &self,
        user_id: Uuid,
        chain: ChainType,
        tx_hash: &str,
        amount: Decimal,
    ) -> RepositoryResult<Option<Decimal>> {
        if amount <= Decimal::ZERO {
            return Err(RepositoryError::InvalidAmount { amount });
        }

        let mut tx = self.pool.begin().await?;
        let user = lock_user(&mut tx, user_id).await?;

        let inserted = insert_ledger_entry(
            &mut tx,
            NewLedgerEntry {
                user_id,
                kind: LedgerEntryKind::Deposit,
                chain: Some(chain),
                amount,
                tx_hash: Some(tx_hash),
                bet_id: None,
                withdrawal_id: None,
            },
        )
        .await?;

        if !inserted {
            debug!(%chain, tx_hash, "Deposit already credited");
            tx.rollback().await?;
            return Ok(None);
        }

        let balance = user.balance + amount;
        set_balance(&mut tx, user_id, balance).await?;
        tx.commit().await?;

        Ok(Some(balance))
    }
}

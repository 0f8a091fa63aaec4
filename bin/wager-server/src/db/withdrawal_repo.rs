use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPool, PgConnection};
use tracing::{info, warn};
use uuid::Uuid;
use wager_models::{ChainType, LedgerEntryKind, Withdrawal, WithdrawalStatus};

use super::ledger_repo::{insert_ledger_entry, NewLedgerEntry};
use super::row_mappers::{FromRow, WITHDRAWAL_COLUMNS};
use super::user_repo::{lock_user, set_balance};
use super::{RepositoryError, RepositoryResult};

/// Status transitions the payout side drives.
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Withdrawals awaiting payout, oldest first.
    async fn pending_withdrawals(&self) -> RepositoryResult<Vec<Withdrawal>>;

    /// Move a `pending` withdrawal to `processing` and return it.
    async fn claim_withdrawal(&self, withdrawal_id: Uuid) -> RepositoryResult<Withdrawal>;

    async fn complete_withdrawal(
        &self,
        withdrawal_id: Uuid,
        tx_hash: &str,
    ) -> RepositoryResult<Withdrawal>;

    /// Park a `processing` withdrawal for an operator. `tx_hash` is set when a
    /// transfer reached the network without a confirmed receipt.
    async fn flag_for_manual_review(
        &self,
        withdrawal_id: Uuid,
        reason: &str,
        tx_hash: Option<&str>,
    ) -> RepositoryResult<Withdrawal>;
}

async fn lock_withdrawal(
    conn: &mut PgConnection,
    withdrawal_id: Uuid,
) -> RepositoryResult<Withdrawal> {
    let row = sqlx::query(&format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1 FOR UPDATE"
    ))
    .bind(withdrawal_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Withdrawal::from_row(&row),
        None => Err(RepositoryError::WithdrawalNotFound { withdrawal_id }),
    }
}

fn expect_status(withdrawal: &Withdrawal, expected: WithdrawalStatus) -> RepositoryResult<()> {
    if withdrawal.status != expected {
        return Err(RepositoryError::WithdrawalState {
            withdrawal_id: withdrawal.id,
            status: withdrawal.status,
            expected,
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct WithdrawalRepository {
    pool: PgPool,
}

impl WithdrawalRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, withdrawal_id: Uuid) -> RepositoryResult<Option<Withdrawal>> {
        let row = sqlx::query(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1"
        ))
        .bind(withdrawal_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Withdrawal::from_row).transpose()
    }

    pub async fn by_status(&self, status: WithdrawalStatus) -> RepositoryResult<Vec<Withdrawal>> {
        let rows = sqlx::query(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE status = $1 ORDER BY created_at"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Withdrawal::from_row).collect()
    }

    /// Debit the balance and record a `pending` withdrawal. The destination is
    /// expected to be validated by the caller.
    pub async fn request(
        &self,
        user_id: Uuid,
        chain: ChainType,
        destination_address: &str,
        amount: Decimal,
    ) -> RepositoryResult<Withdrawal> {
        if amount <= Decimal::ZERO {
            return Err(RepositoryError::InvalidAmount { amount });
        }

        let mut tx = self.pool.begin().await?;
        let user = lock_user(&mut tx, user_id).await?;

        if !user.is_active() {
            return Err(RepositoryError::AccountDisabled { user_id });
        }
        if user.balance < amount {
            return Err(RepositoryError::InsufficientBalance {
                available: user.balance,
                requested: amount,
            });
        }

        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            chain,
            destination_address: destination_address.to_string(),
            amount,
            status: WithdrawalStatus::Pending,
            tx_hash: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO withdrawals (
                id, user_id, chain, destination_address, amount, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(withdrawal.id)
        .bind(user_id)
        .bind(chain.to_db_string())
        .bind(&withdrawal.destination_address)
        .bind(amount)
        .bind(withdrawal.status)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        set_balance(&mut tx, user_id, user.balance - amount).await?;
        insert_ledger_entry(
            &mut tx,
            NewLedgerEntry::for_withdrawal(
                user_id,
                withdrawal.id,
                chain,
                LedgerEntryKind::WithdrawRequest,
                -amount,
            ),
        )
        .await?;

        tx.commit().await?;

        info!(withdrawal_id = %withdrawal.id, %user_id, %amount, %chain, "Withdrawal requested");
        Ok(withdrawal)
    }

    /// Reject a withdrawal that was not paid out and return the funds.
    /// Valid from `pending` or `manual_review`, and refused while a broadcast
    /// transfer is on record.
    pub async fn reject(&self, withdrawal_id: Uuid, reason: &str) -> RepositoryResult<Withdrawal> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM withdrawals WHERE id = $1")
                .bind(withdrawal_id)
                .fetch_optional(&mut *tx)
                .await?;
        let user_id = user_id.ok_or(RepositoryError::WithdrawalNotFound { withdrawal_id })?;
        let user = lock_user(&mut tx, user_id).await?;
        let mut withdrawal = lock_withdrawal(&mut tx, withdrawal_id).await?;

        if !matches!(
            withdrawal.status,
            WithdrawalStatus::Pending | WithdrawalStatus::ManualReview
        ) {
            return Err(RepositoryError::WithdrawalState {
                withdrawal_id,
                status: withdrawal.status,
                expected: WithdrawalStatus::Pending,
            });
        }
        if let Some(tx_hash) = withdrawal.tx_hash.clone() {
            return Err(RepositoryError::WithdrawalBroadcast {
                withdrawal_id,
                tx_hash,
            });
        }

        withdrawal.status = WithdrawalStatus::Rejected;
        withdrawal.failure_reason = Some(reason.to_string());
        withdrawal.updated_at = Utc::now();

        sqlx::query(
            "UPDATE withdrawals SET status = $2, failure_reason = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(withdrawal_id)
        .bind(withdrawal.status)
        .bind(reason)
        .bind(withdrawal.updated_at)
        .execute(&mut *tx)
        .await?;

        set_balance(&mut tx, user_id, user.balance + withdrawal.amount).await?;
        insert_ledger_entry(
            &mut tx,
            NewLedgerEntry::for_withdrawal(
                user_id,
                withdrawal_id,
                withdrawal.chain,
                LedgerEntryKind::WithdrawRefund,
                withdrawal.amount,
            ),
        )
        .await?;

        tx.commit().await?;

        warn!(%withdrawal_id, reason, "Withdrawal rejected and refunded");
        Ok(withdrawal)
    }

    /// Close a `manual_review` withdrawal whose recorded transfer was found on
    /// chain. The debit stands.
    pub async fn mark_paid(&self, withdrawal_id: Uuid) -> RepositoryResult<Withdrawal> {
        let mut tx = self.pool.begin().await?;
        let mut withdrawal = lock_withdrawal(&mut tx, withdrawal_id).await?;
        expect_status(&withdrawal, WithdrawalStatus::ManualReview)?;
        let Some(tx_hash) = withdrawal.tx_hash.clone() else {
            return Err(RepositoryError::InvalidData {
                message: format!("withdrawal {withdrawal_id} has no transaction to confirm"),
            });
        };

        withdrawal.status = WithdrawalStatus::Completed;
        withdrawal.updated_at = Utc::now();
        sqlx::query("UPDATE withdrawals SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(withdrawal_id)
            .bind(withdrawal.status)
            .bind(withdrawal.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(%withdrawal_id, %tx_hash, "Withdrawal confirmed paid from review");
        Ok(withdrawal)
    }

    /// Forget the recorded transfer of a `manual_review` withdrawal once it is
    /// known to have been dropped, so it can be rejected.
    pub async fn release_broadcast(&self, withdrawal_id: Uuid) -> RepositoryResult<Withdrawal> {
        let mut tx = self.pool.begin().await?;
        let mut withdrawal = lock_withdrawal(&mut tx, withdrawal_id).await?;
        expect_status(&withdrawal, WithdrawalStatus::ManualReview)?;

        let released = withdrawal.tx_hash.take();
        withdrawal.updated_at = Utc::now();
        sqlx::query("UPDATE withdrawals SET tx_hash = NULL, updated_at = $2 WHERE id = $1")
            .bind(withdrawal_id)
            .bind(withdrawal.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        warn!(%withdrawal_id, ?released, "Broadcast transfer released as dropped");
        Ok(withdrawal)
    }

    async fn transition(
        &self,
        withdrawal_id: Uuid,
        expected: WithdrawalStatus,
        next: WithdrawalStatus,
        tx_hash: Option<&str>,
        failure_reason: Option<&str>,
    ) -> RepositoryResult<Withdrawal> {
        let mut tx = self.pool.begin().await?;
        let mut withdrawal = lock_withdrawal(&mut tx, withdrawal_id).await?;
        expect_status(&withdrawal, expected)?;

        withdrawal.status = next;
        withdrawal.updated_at = Utc::now();
        if let Some(tx_hash) = tx_hash {
            withdrawal.tx_hash = Some(tx_hash.to_string());
        }
        if let Some(reason) = failure_reason {
            withdrawal.failure_reason = Some(reason.to_string());
        }

        sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = $2, tx_hash = $3, failure_reason = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(withdrawal_id)
        .bind(withdrawal.status)
        .bind(&withdrawal.tx_hash)
        .bind(&withdrawal.failure_reason)
        .bind(withdrawal.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(withdrawal)
    }
}

#[async_trait]
impl WithdrawalStore for WithdrawalRepository {
    async fn pending_withdrawals(&self) -> RepositoryResult<Vec<Withdrawal>> {
        self.by_status(WithdrawalStatus::Pending).await
    }

    async fn claim_withdrawal(&self, withdrawal_id: Uuid) -> RepositoryResult<Withdrawal> {
        self.transition(
            withdrawal_id,
            WithdrawalStatus::Pending,
            WithdrawalStatus::Processing,
            None,
            None,
        )
        .await
    }

    async fn complete_withdrawal(
        &self,
        withdrawal_id: Uuid,
        tx_hash: &str,
    ) -> RepositoryResult<Withdrawal> {
        self.transition(
            withdrawal_id,
            WithdrawalStatus::Processing,
            WithdrawalStatus::Completed,
            Some(tx_hash),
            None,
        )
        .await
    }

    async fn flag_for_manual_review(
        &self,
        withdrawal_id: Uuid,
        reason: &str,
        tx_hash: Option<&str>,
    ) -> RepositoryResult<Withdrawal> {
        self.transition(
            withdrawal_id,
            WithdrawalStatus::Processing,
            WithdrawalStatus::ManualReview,
            tx_hash,
            Some(reason),
        )
        .await
    }
}

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPool, PgConnection};
use tracing::info;
use uuid::Uuid;
use wager_models::{Bet, BetChoice, BetStatus, LedgerEntryKind};

use super::ledger_repo::{insert_ledger_entry, NewLedgerEntry};
use super::row_mappers::{FromRow, BET_COLUMNS};
use super::user_repo::{lock_user, set_balance, set_balance_and_streaks};
use super::{RepositoryError, RepositoryResult};

/// A bet record together with the owner's balance right after the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetWithBalance {
    pub bet: Bet,
    pub balance: Decimal,
}

#[async_trait]
pub trait BetStore: Send + Sync {
    /// Debit the stake and create a pending bet, in one row-locked transaction.
    async fn reserve_bet(
        &self,
        user_id: Uuid,
        choice: BetChoice,
        amount: Decimal,
        payout_multiplier: Decimal,
    ) -> RepositoryResult<BetWithBalance>;

    /// Resolve a pending bet against the proof outcome, crediting any payout.
    async fn settle_bet(
        &self,
        bet_id: Uuid,
        outcome: BetChoice,
        proof_tx_hash: &str,
    ) -> RepositoryResult<BetWithBalance>;

    /// Fail a pending bet and return its stake.
    async fn refund_bet(&self, bet_id: Uuid, reason: &str) -> RepositoryResult<BetWithBalance>;

    /// Bets left pending, oldest first
    async fn pending_bets(&self) -> RepositoryResult<Vec<Bet>>;

    /// A bet as currently stored, with its owner's current balance.
    async fn bet_with_balance(&self, bet_id: Uuid) -> RepositoryResult<Option<BetWithBalance>>;
}

async fn lock_pending_bet(conn: &mut PgConnection, bet_id: Uuid) -> RepositoryResult<Bet> {
    let row = sqlx::query(&format!(
        "SELECT {BET_COLUMNS} FROM bets WHERE id = $1 FOR UPDATE"
    ))
    .bind(bet_id)
    .fetch_optional(&mut *conn)
    .await?;

    let bet = match row {
        Some(row) => Bet::from_row(&row)?,
        None => return Err(RepositoryError::BetNotFound { bet_id }),
    };
    if bet.status != BetStatus::Pending {
        return Err(RepositoryError::BetNotPending {
            bet_id,
            status: bet.status,
        });
    }
    Ok(bet)
}

async fn write_terminal_bet(conn: &mut PgConnection, bet: &Bet) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        UPDATE bets
        SET status = $2,
            payout = $3,
            outcome = $4,
            proof_tx_hash = $5,
            failure_reason = $6,
            settled_at = $7
        WHERE id = $1
        "#,
    )
    .bind(bet.id)
    .bind(bet.status)
    .bind(bet.payout)
    .bind(bet.outcome)
    .bind(&bet.proof_tx_hash)
    .bind(&bet.failure_reason)
    .bind(bet.settled_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct BetRepository {
    pool: PgPool,
}

impl BetRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, bet_id: Uuid) -> RepositoryResult<Option<Bet>> {
        let row = sqlx::query(&format!("SELECT {BET_COLUMNS} FROM bets WHERE id = $1"))
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Bet::from_row).transpose()
    }

    pub async fn bets_for_user(&self, user_id: Uuid, limit: i64) -> RepositoryResult<Vec<Bet>> {
        let rows = sqlx::query(&format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Bet::from_row).collect()
    }

    async fn bet_with_balance(&self, bet_id: Uuid) -> RepositoryResult<Option<BetWithBalance>> {
        let Some(bet) = self.get(bet_id).await? else {
            return Ok(None);
        };
        let balance: Decimal = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(bet.user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::UserNotFound {
                user_id: bet.user_id,
            })?;
        Ok(Some(BetWithBalance { bet, balance }))
    }
}

#[async_trait]
impl BetStore for BetRepository {
    async fn reserve_bet(
        &self,
        user_id: Uuid,
        choice: BetChoice,
        amount: Decimal,
        payout_multiplier: Decimal,
    ) -> RepositoryResult<BetWithBalance> {
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

        let bet = Bet {
            id: Uuid::new_v4(),
            user_id,
            choice,
            amount,
            status: BetStatus::Pending,
            payout_multiplier,
            payout: None,
            outcome: None,
            proof_tx_hash: None,
            failure_reason: None,
            created_at: Utc::now(),
            settled_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO bets (id, user_id, choice, amount, status, payout_multiplier, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(bet.id)
        .bind(bet.user_id)
        .bind(bet.choice)
        .bind(bet.amount)
        .bind(bet.status)
        .bind(bet.payout_multiplier)
        .bind(bet.created_at)
        .execute(&mut *tx)
        .await?;

        let balance = user.balance - amount;
        set_balance(&mut tx, user_id, balance).await?;
        insert_ledger_entry(
            &mut tx,
            NewLedgerEntry::for_bet(user_id, bet.id, LedgerEntryKind::BetStake, -amount),
        )
        .await?;

        tx.commit().await?;
        Ok(BetWithBalance { bet, balance })
    }

    async fn settle_bet(
        &self,
        bet_id: Uuid,
        outcome: BetChoice,
        proof_tx_hash: &str,
    ) -> RepositoryResult<BetWithBalance> {
        let mut tx = self.pool.begin().await?;

        // user before bet, the same order reserve and refund take their locks in
        let user_id: Option<Uuid> = sqlx::query_scalar("SELECT user_id FROM bets WHERE id = $1")
            .bind(bet_id)
            .fetch_optional(&mut *tx)
            .await?;
        let user_id = user_id.ok_or(RepositoryError::BetNotFound { bet_id })?;
        let user = lock_user(&mut tx, user_id).await?;
        let bet = lock_pending_bet(&mut tx, bet_id).await?;

        let bet = bet.resolve(outcome, proof_tx_hash.to_string(), Utc::now());
        let payout = bet.payout.unwrap_or(Decimal::ZERO);
        let (balance, streaks) = if bet.is_won() {
            (user.balance + payout, user.streaks.after_win())
        } else {
            (user.balance, user.streaks.after_loss())
        };

        write_terminal_bet(&mut tx, &bet).await?;
        set_balance_and_streaks(&mut tx, user_id, balance, streaks).await?;
        if bet.is_won() {
            insert_ledger_entry(
                &mut tx,
                NewLedgerEntry::for_bet(user_id, bet_id, LedgerEntryKind::BetPayout, payout),
            )
            .await?;
        }

        tx.commit().await?;

        info!(%bet_id, status = ?bet.status, %payout, "Bet settled");
        Ok(BetWithBalance { bet, balance })
    }

    async fn refund_bet(&self, bet_id: Uuid, reason: &str) -> RepositoryResult<BetWithBalance> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<Uuid> = sqlx::query_scalar("SELECT user_id FROM bets WHERE id = $1")
            .bind(bet_id)
            .fetch_optional(&mut *tx)
            .await?;
        let user_id = user_id.ok_or(RepositoryError::BetNotFound { bet_id })?;
        let user = lock_user(&mut tx, user_id).await?;
        let bet = lock_pending_bet(&mut tx, bet_id).await?;

        let bet = bet.fail(reason, Utc::now());
        let balance = user.balance + bet.amount;

        write_terminal_bet(&mut tx, &bet).await?;
        set_balance(&mut tx, user_id, balance).await?;
        insert_ledger_entry(
            &mut tx,
            NewLedgerEntry::for_bet(user_id, bet_id, LedgerEntryKind::BetRefund, bet.amount),
        )
        .await?;

        tx.commit().await?;

        info!(%bet_id, refunded = %bet.amount, reason, "Bet refunded");
        Ok(BetWithBalance { bet, balance })
    }

    async fn pending_bets(&self) -> RepositoryResult<Vec<Bet>> {
        let rows = sqlx::query(&format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE status = 'pending' ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Bet::from_row).collect()
    }

    async fn bet_with_balance(&self, bet_id: Uuid) -> RepositoryResult<Option<BetWithBalance>> {
        let Some(bet) = self.get(bet_id).await? else {
            return Ok(None);
        };
        let balance: Decimal = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(bet.user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::UserNotFound {
                user_id: bet.user_id,
            })?;
        Ok(Some(BetWithBalance { bet, balance }))
    }
}

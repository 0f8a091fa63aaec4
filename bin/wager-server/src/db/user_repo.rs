use alloy::primitives::Address;
use chrono::Utc;
use rust_decimal::Decimal;
use snafu::ResultExt;
use sqlx::{postgres::PgPool, PgConnection, Row};
use tracing::info;
use uuid::Uuid;
use wager_chains::next_deposit_index;
use wager_models::{ChainType, DepositAddress, Streaks, User, UserStatus};

use super::row_mappers::{
    address_to_db, chain_from_db, path_index_from_db, path_index_to_db, FromRow, USER_COLUMNS,
};
use super::{AddressDerivationSnafu, RepositoryError, RepositoryResult};

/// Lock a user row for the rest of the surrounding transaction.
pub(crate) async fn lock_user(conn: &mut PgConnection, user_id: Uuid) -> RepositoryResult<User> {
    let row = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => User::from_row(&row),
        None => Err(RepositoryError::UserNotFound { user_id }),
    }
}

pub(crate) async fn set_balance(
    conn: &mut PgConnection,
    user_id: Uuid,
    balance: Decimal,
) -> RepositoryResult<()> {
    sqlx::query("UPDATE users SET balance = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(balance)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn set_balance_and_streaks(
    conn: &mut PgConnection,
    user_id: Uuid,
    balance: Decimal,
    streaks: Streaks,
) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET balance = $2,
            win_streak = $3,
            loss_streak = $4,
            best_win_streak = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(balance)
    .bind(streaks.win_streak)
    .bind(streaks.loss_streak)
    .bind(streaks.best_win_streak)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A deposit address together with the user and HD index it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositAddressRow {
    pub user_id: Uuid,
    pub deposit_path_index: u32,
    pub address: String,
}

pub(crate) async fn list_deposit_addresses(
    pool: &PgPool,
    chain: ChainType,
) -> RepositoryResult<Vec<DepositAddressRow>> {
    let rows = sqlx::query(
        r#"
        SELECT d.user_id, d.address, u.deposit_path_index
        FROM deposit_addresses d
        JOIN users u ON u.id = d.user_id
        WHERE d.chain = $1
        ORDER BY u.deposit_path_index
        "#,
    )
    .bind(chain.to_db_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let index: i32 = row.try_get("deposit_path_index")?;
            Ok(DepositAddressRow {
                user_id: row.try_get("user_id")?,
                deposit_path_index: path_index_from_db(index)?,
                address: row.try_get("address")?,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a user with the next free deposit index.
    ///
    /// The index is read and the user inserted under an exclusive table lock,
    /// so concurrent registrations serialize here. `derive` maps the allocated
    /// index to the user's per-chain deposit addresses.
    pub async fn register<F>(&self, reserved_floor: u32, derive: F) -> RepositoryResult<User>
    where
        F: FnOnce(u32) -> wager_chains::Result<Vec<(ChainType, Address)>>,
    {
        let mut tx = self.pool.begin().await?;

        sqlx::query("LOCK TABLE users IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let current: Option<i32> =
            sqlx::query_scalar("SELECT MAX(deposit_path_index) FROM users")
                .fetch_one(&mut *tx)
                .await?;
        let current = current.map(path_index_from_db).transpose()?;
        let index = next_deposit_index(current, reserved_floor).context(AddressDerivationSnafu)?;
        let addresses = derive(index).context(AddressDerivationSnafu)?;

        let user_id = Uuid::new_v4();
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, balance, deposit_path_index, status, created_at, updated_at)
            VALUES ($1, 0, $2, 'active', $3, $3)
            "#,
        )
        .bind(user_id)
        .bind(path_index_to_db(index)?)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        let mut deposit_addresses = Vec::with_capacity(addresses.len());
        for (chain, address) in addresses {
            let address = address_to_db(&address);
            sqlx::query(
                r#"
                INSERT INTO deposit_addresses (user_id, chain, address, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(user_id)
            .bind(chain.to_db_string())
            .bind(&address)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
            deposit_addresses.push(DepositAddress { chain, address });
        }

        tx.commit().await?;

        info!(%user_id, deposit_path_index = index, "Registered user");

        Ok(User {
            id: user_id,
            balance: Decimal::ZERO,
            deposit_path_index: index,
            deposit_addresses,
            status: UserStatus::Active,
            streaks: Streaks::default(),
            created_at,
        })
    }

    pub async fn get(&self, user_id: Uuid) -> RepositoryResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut user = User::from_row(&row)?;

        let rows = sqlx::query(
            "SELECT chain, address FROM deposit_addresses WHERE user_id = $1 ORDER BY chain",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let chain: String = row.try_get("chain")?;
            user.deposit_addresses.push(DepositAddress {
                chain: chain_from_db(&chain)?,
                address: row.try_get("address")?,
            });
        }

        Ok(Some(user))
    }

    pub async fn set_status(&self, user_id: Uuid, status: UserStatus) -> RepositoryResult<()> {
        let updated = sqlx::query("UPDATE users SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(status)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::UserNotFound { user_id });
        }
        Ok(())
    }

    pub async fn deposit_addresses(
        &self,
        chain: ChainType,
    ) -> RepositoryResult<Vec<DepositAddressRow>> {
        list_deposit_addresses(&self.pool, chain).await
    }
}

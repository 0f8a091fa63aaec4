pub mod bet_repo;
pub mod ledger_repo;
pub mod platform_wallet_repo;
pub mod retry_queue_repo;
pub mod row_mappers;
pub mod user_repo;
pub mod withdrawal_repo;

pub use bet_repo::{BetRepository, BetStore, BetWithBalance};
pub use ledger_repo::{DepositStore, DepositTarget, LedgerRepository};
pub use platform_wallet_repo::{PlatformWalletRepository, PlatformWalletStore};
pub use retry_queue_repo::{CollectionStore, CollectionTarget, RetryQueueRepository};
pub use user_repo::{DepositAddressRow, UserRepository};
pub use withdrawal_repo::{WithdrawalRepository, WithdrawalStore};

use rust_decimal::Decimal;
use snafu::prelude::*;
use sqlx::{
    migrate::Migrator,
    postgres::{PgPool, PgPoolOptions},
};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;
use wager_models::{BetStatus, WithdrawalStatus};

// Embeds all migration files from ./migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RepositoryError {
    #[snafu(display("Database error: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("Database migration error: {source}"))]
    Migration { source: sqlx::migrate::MigrateError },

    #[snafu(display("User {user_id} not found"))]
    UserNotFound { user_id: Uuid },

    #[snafu(display("Account {user_id} is disabled"))]
    AccountDisabled { user_id: Uuid },

    #[snafu(display("Insufficient balance: available {available}, requested {requested}"))]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[snafu(display("Amount must be positive, got {amount}"))]
    InvalidAmount { amount: Decimal },

    #[snafu(display("Bet {bet_id} not found"))]
    BetNotFound { bet_id: Uuid },

    #[snafu(display("Bet {bet_id} is already {status:?}"))]
    BetNotPending { bet_id: Uuid, status: BetStatus },

    #[snafu(display("Withdrawal {withdrawal_id} not found"))]
    WithdrawalNotFound { withdrawal_id: Uuid },

    #[snafu(display("Withdrawal {withdrawal_id} is {status:?}, expected {expected:?}"))]
    WithdrawalState {
        withdrawal_id: Uuid,
        status: WithdrawalStatus,
        expected: WithdrawalStatus,
    },

    #[snafu(display("Withdrawal {withdrawal_id} was broadcast in {tx_hash} and may still be paid"))]
    WithdrawalBroadcast {
        withdrawal_id: Uuid,
        tx_hash: String,
    },

    #[snafu(display("Key derivation failed during registration: {source}"))]
    AddressDerivation { source: wager_chains::Error },

    #[snafu(display("Invalid data: {message}"))]
    InvalidData { message: String },
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::Database { source: err }
    }
}

impl RepositoryError {
    /// Rejections that belong to the caller rather than to the system.
    pub fn is_business_rule_violation(&self) -> bool {
        matches!(
            self,
            RepositoryError::UserNotFound { .. }
                | RepositoryError::AccountDisabled { .. }
                | RepositoryError::InsufficientBalance { .. }
                | RepositoryError::InvalidAmount { .. }
        )
    }
}

pub type RepositoryResult<T, E = RepositoryError> = std::result::Result<T, E>;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new Database instance with connection pooling and automatic migrations
    pub async fn connect(
        database_url: &str,
        max_db_connections: u32,
        min_db_connections: u32,
    ) -> RepositoryResult<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(max_db_connections)
            .min_connections(min_db_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a Database instance from an existing pool (useful for tests)
    pub async fn from_pool(pool: PgPool) -> RepositoryResult<Self> {
        info!("Running database migrations...");
        MIGRATOR.run(&pool).await.context(MigrationSnafu)?;
        info!("Database initialization complete");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    #[must_use]
    pub fn bets(&self) -> BetRepository {
        BetRepository::new(self.pool.clone())
    }

    #[must_use]
    pub fn ledger(&self) -> LedgerRepository {
        LedgerRepository::new(self.pool.clone())
    }

    #[must_use]
    pub fn withdrawals(&self) -> WithdrawalRepository {
        WithdrawalRepository::new(self.pool.clone())
    }

    #[must_use]
    pub fn platform_wallets(&self) -> PlatformWalletRepository {
        PlatformWalletRepository::new(self.pool.clone())
    }

    #[must_use]
    pub fn retry_queue(&self) -> RetryQueueRepository {
        RetryQueueRepository::new(self.pool.clone())
    }
}

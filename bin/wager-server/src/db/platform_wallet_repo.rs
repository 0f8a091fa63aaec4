use async_trait::async_trait;
use sqlx::postgres::PgPool;
use wager_models::{ChainType, PlatformWallet, WalletRole};

use super::row_mappers::{FromRow, PLATFORM_WALLET_COLUMNS};
use super::RepositoryResult;

#[async_trait]
pub trait PlatformWalletStore: Send + Sync {
    /// The active wallet holding `role` on `chain`, oldest first if several qualify.
    async fn active_wallet(
        &self,
        chain: ChainType,
        role: WalletRole,
    ) -> RepositoryResult<Option<PlatformWallet>>;
}

#[derive(Clone)]
pub struct PlatformWalletRepository {
    pool: PgPool,
}

impl PlatformWalletRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a wallet's role flags. Operator tooling only.
    pub async fn upsert(&self, wallet: &PlatformWallet) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_wallets (
                address, chain, is_gas_reserve, is_collection, is_payout,
                is_proof_opener_a, is_proof_opener_b, is_active
            )
            VALUES (LOWER($1), $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (chain, address) DO UPDATE SET
                is_gas_reserve = EXCLUDED.is_gas_reserve,
                is_collection = EXCLUDED.is_collection,
                is_payout = EXCLUDED.is_payout,
                is_proof_opener_a = EXCLUDED.is_proof_opener_a,
                is_proof_opener_b = EXCLUDED.is_proof_opener_b,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&wallet.address)
        .bind(wallet.chain.to_db_string())
        .bind(wallet.roles.gas_reserve)
        .bind(wallet.roles.collection)
        .bind(wallet.roles.payout)
        .bind(wallet.roles.proof_opener_a)
        .bind(wallet.roles.proof_opener_b)
        .bind(wallet.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformWalletStore for PlatformWalletRepository {
    async fn active_wallet(
        &self,
        chain: ChainType,
        role: WalletRole,
    ) -> RepositoryResult<Option<PlatformWallet>> {
        // role.column() is a fixed identifier, never user input
        let row = sqlx::query(&format!(
            r#"
            SELECT {PLATFORM_WALLET_COLUMNS}
            FROM platform_wallets
            WHERE chain = $1 AND is_active AND {}
            ORDER BY created_at
            LIMIT 1
            "#,
            role.column()
        ))
        .bind(chain.to_db_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(PlatformWallet::from_row).transpose()
    }
}

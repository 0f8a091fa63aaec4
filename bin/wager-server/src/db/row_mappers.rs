use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;
use wager_models::{
    Bet, BetChoice, BetStatus, ChainType, CollectionRetryEntry, LedgerEntry, LedgerEntryKind,
    LedgerEntryStatus, PlatformWallet, Streaks, User, UserStatus, WalletRoles, Withdrawal,
    WithdrawalStatus,
};

use super::{RepositoryError, RepositoryResult};

pub const USER_COLUMNS: &str = "id, balance, deposit_path_index, status, win_streak, loss_streak, best_win_streak, created_at";

pub const BET_COLUMNS: &str = "id, user_id, choice, amount, status, payout_multiplier, payout, outcome, proof_tx_hash, failure_reason, created_at, settled_at";

pub const WITHDRAWAL_COLUMNS: &str = "id, user_id, chain, destination_address, amount, status, tx_hash, failure_reason, created_at, updated_at";

pub const LEDGER_COLUMNS: &str =
    "id, user_id, kind, chain, amount, tx_hash, bet_id, withdrawal_id, status, created_at";

pub const PLATFORM_WALLET_COLUMNS: &str = "address, chain, is_gas_reserve, is_collection, is_payout, is_proof_opener_a, is_proof_opener_b, is_active";

pub trait FromRow<'r>: Sized {
    fn from_row(row: &'r PgRow) -> RepositoryResult<Self>;
}

pub fn chain_from_db(chain: &str) -> RepositoryResult<ChainType> {
    ChainType::from_db_string(chain).ok_or_else(|| RepositoryError::InvalidData {
        message: format!("Invalid chain type: {chain}"),
    })
}

/// Addresses are stored lowercase so equality in SQL matches equality of the parsed address.
#[must_use]
pub fn address_to_db(address: &Address) -> String {
    format!("0x{}", alloy::hex::encode(address))
}

pub fn path_index_from_db(index: i32) -> RepositoryResult<u32> {
    u32::try_from(index).map_err(|_| RepositoryError::InvalidData {
        message: format!("Negative deposit path index: {index}"),
    })
}

pub fn path_index_to_db(index: u32) -> RepositoryResult<i32> {
    i32::try_from(index).map_err(|_| RepositoryError::InvalidData {
        message: format!("Deposit path index out of range: {index}"),
    })
}

impl<'r> FromRow<'r> for User {
    /// Deposit addresses live in their own table and are attached by the repository.
    fn from_row(row: &'r PgRow) -> RepositoryResult<Self> {
        let index: i32 = row.try_get("deposit_path_index")?;
        Ok(User {
            id: row.try_get("id")?,
            balance: row.try_get("balance")?,
            deposit_path_index: path_index_from_db(index)?,
            deposit_addresses: Vec::new(),
            status: row.try_get::<UserStatus, _>("status")?,
            streaks: Streaks {
                win_streak: row.try_get("win_streak")?,
                loss_streak: row.try_get("loss_streak")?,
                best_win_streak: row.try_get("best_win_streak")?,
            },
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r> for Bet {
    fn from_row(row: &'r PgRow) -> RepositoryResult<Self> {
        Ok(Bet {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            choice: row.try_get::<BetChoice, _>("choice")?,
            amount: row.try_get("amount")?,
            status: row.try_get::<BetStatus, _>("status")?,
            payout_multiplier: row.try_get("payout_multiplier")?,
            payout: row.try_get::<Option<Decimal>, _>("payout")?,
            outcome: row.try_get::<Option<BetChoice>, _>("outcome")?,
            proof_tx_hash: row.try_get("proof_tx_hash")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            settled_at: row.try_get::<Option<DateTime<Utc>>, _>("settled_at")?,
        })
    }
}

impl<'r> FromRow<'r> for Withdrawal {
    fn from_row(row: &'r PgRow) -> RepositoryResult<Self> {
        let chain: String = row.try_get("chain")?;
        Ok(Withdrawal {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            chain: chain_from_db(&chain)?,
            destination_address: row.try_get("destination_address")?,
            amount: row.try_get("amount")?,
            status: row.try_get::<WithdrawalStatus, _>("status")?,
            tx_hash: row.try_get("tx_hash")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r> for LedgerEntry {
    fn from_row(row: &'r PgRow) -> RepositoryResult<Self> {
        let chain: Option<String> = row.try_get("chain")?;
        Ok(LedgerEntry {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: row.try_get::<LedgerEntryKind, _>("kind")?,
            chain: chain.as_deref().map(chain_from_db).transpose()?,
            amount: row.try_get("amount")?,
            tx_hash: row.try_get("tx_hash")?,
            bet_id: row.try_get::<Option<Uuid>, _>("bet_id")?,
            withdrawal_id: row.try_get::<Option<Uuid>, _>("withdrawal_id")?,
            status: row.try_get::<LedgerEntryStatus, _>("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r> for PlatformWallet {
    fn from_row(row: &'r PgRow) -> RepositoryResult<Self> {
        let chain: String = row.try_get("chain")?;
        Ok(PlatformWallet {
            address: row.try_get("address")?,
            chain: chain_from_db(&chain)?,
            roles: WalletRoles {
                gas_reserve: row.try_get("is_gas_reserve")?,
                collection: row.try_get("is_collection")?,
                payout: row.try_get("is_payout")?,
                proof_opener_a: row.try_get("is_proof_opener_a")?,
                proof_opener_b: row.try_get("is_proof_opener_b")?,
            },
            is_active: row.try_get("is_active")?,
        })
    }
}

impl<'r> FromRow<'r> for CollectionRetryEntry {
    fn from_row(row: &'r PgRow) -> RepositoryResult<Self> {
        let chain: String = row.try_get("chain")?;
        Ok(CollectionRetryEntry {
            user_id: row.try_get("user_id")?,
            chain: chain_from_db(&chain)?,
            retry_count: row.try_get("retry_count")?,
            error_reason: row.try_get("error_reason")?,
            next_retry_at: row.try_get::<Option<DateTime<Utc>>, _>("next_retry_at")?,
        })
    }
}

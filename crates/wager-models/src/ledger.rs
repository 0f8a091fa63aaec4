use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ChainType, LedgerEntryStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "ledger_entry_kind", rename_all = "snake_case")
)]
pub enum LedgerEntryKind {
    Deposit,
    WithdrawRequest,
    WithdrawRefund,
    BetStake,
    BetPayout,
    BetRefund,
}

/// One row of the append-only `platform_transactions` ledger.
///
/// `amount` is signed: debits are negative. `(chain, tx_hash)` is unique, which is
/// what makes deposit ingestion idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,
    pub chain: Option<ChainType>,
    pub amount: Decimal,
    pub tx_hash: Option<String>,
    pub bet_id: Option<Uuid>,
    pub withdrawal_id: Option<Uuid>,
    pub status: LedgerEntryStatus,
    pub created_at: DateTime<Utc>,
}

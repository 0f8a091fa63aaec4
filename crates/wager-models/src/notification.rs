use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BetChoice, BetStatus, ChainType};

/// Real-time push delivered to a connected user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BetPlaced {
        bet_id: Uuid,
        choice: BetChoice,
        amount: Decimal,
    },
    BetSettled {
        bet_id: Uuid,
        status: BetStatus,
        outcome: BetChoice,
        payout: Decimal,
        proof_tx_hash: String,
    },
    BetFailed {
        bet_id: Uuid,
        refunded: Decimal,
        reason: String,
    },
    DepositCredited {
        chain: ChainType,
        tx_hash: String,
        amount: Decimal,
    },
    BalanceUpdated {
        balance: Decimal,
    },
}

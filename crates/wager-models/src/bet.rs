use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BetStatus;

/// The two sides of a wager. `Head` is side A (even proof digit), `Tail` is side B (odd).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "bet_choice", rename_all = "snake_case"))]
pub enum BetChoice {
    Head,
    Tail,
}

impl BetChoice {
    /// Outcome rule: parity of the last hex digit of the proof transaction hash.
    ///
    /// Returns `None` when the hash does not end in a hex digit. This is a plain
    /// deterministic rule, not a player-verifiable commitment scheme.
    pub fn from_proof_hash(tx_hash: &str) -> Option<BetChoice> {
        let last = tx_hash.trim().chars().last()?;
        let nibble = last.to_digit(16)?;
        if nibble % 2 == 0 {
            Some(BetChoice::Head)
        } else {
            Some(BetChoice::Tail)
        }
    }
}

impl std::str::FromStr for BetChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "head" | "heads" => Ok(BetChoice::Head),
            "tail" | "tails" => Ok(BetChoice::Tail),
            other => Err(format!("unknown bet choice: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub choice: BetChoice,
    pub amount: Decimal,
    pub status: BetStatus,
    /// Multiplier locked in when the bet was reserved.
    pub payout_multiplier: Decimal,
    pub payout: Option<Decimal>,
    pub outcome: Option<BetChoice>,
    pub proof_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// Apply a settled outcome to a pending bet. A matching choice wins
    /// `amount * payout_multiplier`; anything else loses the stake.
    #[must_use]
    pub fn resolve(mut self, outcome: BetChoice, proof_tx_hash: String, at: DateTime<Utc>) -> Bet {
        let won = self.choice == outcome;
        self.status = if won { BetStatus::Won } else { BetStatus::Lost };
        self.payout = Some(if won {
            winning_payout(self.amount, self.payout_multiplier)
        } else {
            Decimal::ZERO
        });
        self.outcome = Some(outcome);
        self.proof_tx_hash = Some(proof_tx_hash);
        self.settled_at = Some(at);
        self
    }

    /// Mark a pending bet as failed. The caller returns the stake.
    #[must_use]
    pub fn fail(mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Bet {
        self.status = BetStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.settled_at = Some(at);
        self
    }

    pub fn is_won(&self) -> bool {
        self.status == BetStatus::Won
    }
}

/// Gross payout for a winning stake. The stake itself is not returned on top.
pub fn winning_payout(amount: Decimal, multiplier: Decimal) -> Decimal {
    (amount * multiplier).round_dp(18)
}

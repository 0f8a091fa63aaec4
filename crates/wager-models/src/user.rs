use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ChainType, UserStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streaks {
    pub win_streak: i32,
    pub loss_streak: i32,
    pub best_win_streak: i32,
}

impl Streaks {
    #[must_use]
    pub fn after_win(self) -> Self {
        let win_streak = self.win_streak + 1;
        Self {
            win_streak,
            loss_streak: 0,
            best_win_streak: self.best_win_streak.max(win_streak),
        }
    }

    #[must_use]
    pub fn after_loss(self) -> Self {
        Self {
            win_streak: 0,
            loss_streak: self.loss_streak + 1,
            best_win_streak: self.best_win_streak,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub chain: ChainType,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub balance: Decimal,
    /// HD leaf index shared by every chain's deposit address. Never reused.
    pub deposit_path_index: u32,
    pub deposit_addresses: Vec<DepositAddress>,
    pub status: UserStatus,
    pub streaks: Streaks,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn deposit_address(&self, chain: ChainType) -> Option<&str> {
        self.deposit_addresses
            .iter()
            .find(|a| a.chain == chain)
            .map(|a| a.address.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

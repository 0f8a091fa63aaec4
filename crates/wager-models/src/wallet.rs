use serde::{Deserialize, Serialize};

use crate::ChainType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletRole {
    /// Holds native gas used to pre-fund deposit addresses.
    GasReserve,
    /// Treasury destination for swept deposit balances.
    Collection,
    /// Treasury source for outbound withdrawals.
    Payout,
    ProofOpenerA,
    ProofOpenerB,
}

impl WalletRole {
    /// Name of the boolean flag column in `platform_wallets`.
    pub fn column(&self) -> &'static str {
        match self {
            WalletRole::GasReserve => "is_gas_reserve",
            WalletRole::Collection => "is_collection",
            WalletRole::Payout => "is_payout",
            WalletRole::ProofOpenerA => "is_proof_opener_a",
            WalletRole::ProofOpenerB => "is_proof_opener_b",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRoles {
    pub gas_reserve: bool,
    pub collection: bool,
    pub payout: bool,
    pub proof_opener_a: bool,
    pub proof_opener_b: bool,
}

impl WalletRoles {
    pub fn has(&self, role: WalletRole) -> bool {
        match role {
            WalletRole::GasReserve => self.gas_reserve,
            WalletRole::Collection => self.collection,
            WalletRole::Payout => self.payout,
            WalletRole::ProofOpenerA => self.proof_opener_a,
            WalletRole::ProofOpenerB => self.proof_opener_b,
        }
    }
}

/// Operator-managed platform wallet. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformWallet {
    pub address: String,
    pub chain: ChainType,
    pub roles: WalletRoles,
    pub is_active: bool,
}

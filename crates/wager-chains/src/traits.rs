use crate::Result;
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use wager_models::ChainType;

/// A token transfer into a watched address, as reported by the chain indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTransfer {
    /// Canonical `0x`-prefixed lowercase hash
    pub tx_hash: String,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub block_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TransferPage {
    pub transfers: Vec<IncomingTransfer>,
    pub has_more: bool,
}

/// Parse an address into its canonical form. Case and checksum are ignored so
/// that two spellings of the same address always compare equal.
pub fn canonical_address(address: &str) -> Option<Address> {
    let trimmed = address.trim();
    if !trimmed.starts_with("0x") && !trimmed.starts_with("0X") {
        return None;
    }
    Address::from_str(&trimmed.to_ascii_lowercase()).ok()
}

// implementors of this trait should be stateless apart from their connections
#[async_trait]
pub trait ChainOperations: Send + Sync {
    fn chain_type(&self) -> ChainType;

    /// Decimals of the configured deposit token
    fn token_decimals(&self) -> u8;

    fn token_address(&self) -> Address;

    /// Validate an address format
    fn validate_address(&self, address: &str) -> bool {
        canonical_address(address).is_some()
    }

    async fn native_balance(&self, address: Address) -> Result<U256>;

    /// Balance of the configured token, via a read-only contract call
    async fn token_balance(&self, address: Address) -> Result<U256>;

    /// Send native gas and wait for inclusion. Returns the transaction hash.
    async fn transfer_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> Result<String>;

    /// Send the configured token and wait for inclusion. Returns the transaction hash.
    async fn transfer_token(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> Result<String>;

    /// Broadcast a zero-value transaction and return its hash without waiting
    /// for inclusion.
    async fn broadcast_proof(&self, signer: &PrivateKeySigner, to: Address) -> Result<String>;

    /// One page (1-based) of token transfers into `address` in blocks at or
    /// after `since`, oldest first.
    async fn incoming_transfers(
        &self,
        address: Address,
        since: DateTime<Utc>,
        page: u32,
    ) -> Result<TransferPage>;
}

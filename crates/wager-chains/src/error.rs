use std::time::Duration;

use alloy::transports::{RpcError, TransportErrorKind};
use snafu::{prelude::*, Location};
use wager_models::ChainType;

/// How a caller should react to a failed chain interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, dropped connections, overloaded nodes. Worth retrying with backoff.
    Transient,
    /// Malformed targets, missing contracts, reverted transactions. Retrying cannot help.
    Permanent,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid address format for {address} for network {network:?}: {reason}"))]
    InvalidAddress {
        address: String,
        network: ChainType,
        reason: String,
    },

    #[snafu(display("Invalid mnemonic: {reason}"))]
    InvalidMnemonic { reason: String },

    #[snafu(display("Key derivation failed: {message}"))]
    KeyDerivation { message: String },

    #[snafu(display("Derivation index {index} is outside the non-hardened range"))]
    InvalidIndex { index: u32 },

    #[snafu(display("EVMRPCError at {loc}: {source}"))]
    EVMRpcError {
        source: RpcError<TransportErrorKind>,
        #[snafu(implicit)]
        loc: Location,
    },

    #[snafu(display("Contract call failed at {loc}: {source}"))]
    ContractCall {
        source: alloy::contract::Error,
        #[snafu(implicit)]
        loc: Location,
    },

    #[snafu(display("No contract code at token address {token} on {network:?}"))]
    ContractAbsent { token: String, network: ChainType },

    /// The transaction was broadcast but no receipt was observed. It may still land.
    #[snafu(display("Transaction {tx_hash} unconfirmed at {loc}: {source}"))]
    Unconfirmed {
        tx_hash: String,
        source: alloy::providers::PendingTransactionError,
        #[snafu(implicit)]
        loc: Location,
    },

    #[snafu(display("Transaction {tx_hash} reverted"))]
    TransactionReverted { tx_hash: String },

    #[snafu(display("{operation} timed out after {timeout:?}"))]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[snafu(display("EVMTokenIndexerClientError at {loc}: {source}"))]
    EVMTokenIndexerClientError {
        source: evm_token_indexer_client::Error,
        #[snafu(implicit)]
        loc: Location,
    },

    #[snafu(display("Chain not supported: {chain}"))]
    ChainNotSupported { chain: String },

    #[snafu(display("Serialization error: {message}"))]
    Serialization { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::EVMRpcError { source, .. } => rpc_failure_kind(source),
            Error::ContractCall { source, .. } => match source {
                alloy::contract::Error::TransportError(inner) => rpc_failure_kind(inner),
                // zero return data means nothing is deployed at the token address
                _ => FailureKind::Permanent,
            },
            Error::Timeout { .. }
            | Error::EVMTokenIndexerClientError { .. } => FailureKind::Transient,
            Error::InvalidAddress { .. }
            | Error::InvalidMnemonic { .. }
            | Error::KeyDerivation { .. }
            | Error::InvalidIndex { .. }
            | Error::ContractAbsent { .. }
            | Error::TransactionReverted { .. }
            | Error::Unconfirmed { .. }
            | Error::ChainNotSupported { .. }
            | Error::Serialization { .. } => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Hash of a broadcast transaction whose outcome is unknown. Resending
    /// after such an error risks a second transfer.
    pub fn unconfirmed_hash(&self) -> Option<&str> {
        match self {
            Error::Unconfirmed { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }
}

fn rpc_failure_kind(error: &RpcError<TransportErrorKind>) -> FailureKind {
    match error {
        RpcError::Transport(_) | RpcError::NullResp => FailureKind::Transient,
        RpcError::SerError(_) | RpcError::DeserError { .. } => FailureKind::Transient,
        // -32602: the node rejected our parameters, e.g. a malformed address
        RpcError::ErrorResp(payload) if payload.code == -32602 => FailureKind::Permanent,
        RpcError::ErrorResp(_) => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

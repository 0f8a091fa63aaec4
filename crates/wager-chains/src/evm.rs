use std::future::Future;
use std::time::Duration;

use crate::{traits::TransferPage, ChainOperations, Error, IncomingTransfer, Result};
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use blockchain_utils::GenericERC20::GenericERC20Instance;
use chrono::{DateTime, Utc};
use evm_token_indexer_client::{TokenIndexerClient, TransferQuery};
use snafu::location;
use tracing::{debug, info, warn};
use wager_models::ChainType;

#[derive(Debug, Clone)]
pub struct EvmChainConfig {
    pub chain_type: ChainType,
    pub rpc_url: String,
    pub indexer_url: String,
    /// The ERC-20 accepted for deposits on this chain
    pub token_address: Address,
    pub token_decimals: u8,
    /// Upper bound for any single RPC round trip
    pub rpc_timeout: Duration,
    /// Upper bound for waiting on a receipt after broadcast
    pub confirmation_timeout: Duration,
    pub indexer_page_limit: u32,
}

pub struct EvmChain {
    client: RpcClient,
    provider: DynProvider,
    indexer: TokenIndexerClient,
    config: EvmChainConfig,
}

impl EvmChain {
    pub fn new(config: EvmChainConfig) -> Result<Self> {
        let url = config
            .rpc_url
            .parse()
            .map_err(|_| Error::Serialization {
                message: format!("Invalid RPC URL for {}", config.chain_type),
            })?;

        let client = alloy::rpc::client::ClientBuilder::default().http(url);

        let provider = ProviderBuilder::new()
            .connect_client(client.clone())
            .erased();

        let indexer = TokenIndexerClient::new(&config.indexer_url, config.rpc_timeout).map_err(
            |e| Error::EVMTokenIndexerClientError {
                source: e,
                loc: location!(),
            },
        )?;

        info!(
            chain = %config.chain_type,
            token = %config.token_address,
            "Initialized EVM chain"
        );

        Ok(Self {
            client,
            provider,
            indexer,
            config,
        })
    }

    fn signing_provider(&self, signer: &PrivateKeySigner) -> DynProvider {
        ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_client(self.client.clone())
            .erased()
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let timeout = self.config.rpc_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::Timeout { operation, timeout })?
    }

    async fn wait_for_receipt(&self, pending: PendingTransactionBuilder<alloy::network::Ethereum>) -> Result<String> {
        let tx_hash = *pending.tx_hash();
        let receipt = pending
            .with_timeout(Some(self.config.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| Error::Unconfirmed {
                tx_hash: format_hash(tx_hash),
                source: e,
                loc: location!(),
            })?;

        if !receipt.status() {
            return Err(Error::TransactionReverted {
                tx_hash: format_hash(tx_hash),
            });
        }
        Ok(format_hash(receipt.transaction_hash()))
    }
}

fn format_hash(hash: B256) -> String {
    format!("{hash:#x}")
}

#[async_trait]
impl ChainOperations for EvmChain {
    fn chain_type(&self) -> ChainType {
        self.config.chain_type
    }

    fn token_decimals(&self) -> u8 {
        self.config.token_decimals
    }

    fn token_address(&self) -> Address {
        self.config.token_address
    }

    async fn native_balance(&self, address: Address) -> Result<U256> {
        self.bounded("eth_getBalance", async {
            self.provider
                .get_balance(address)
                .await
                .map_err(|e| Error::EVMRpcError {
                    source: e,
                    loc: location!(),
                })
        })
        .await
    }

    async fn token_balance(&self, address: Address) -> Result<U256> {
        let token = GenericERC20Instance::new(self.config.token_address, &self.provider);
        self.bounded("balanceOf", async {
            token.balanceOf(address).call().await.map_err(|e| match e {
                alloy::contract::Error::ZeroData(..) => Error::ContractAbsent {
                    token: self.config.token_address.to_string(),
                    network: self.config.chain_type,
                },
                e => Error::ContractCall {
                    source: e,
                    loc: location!(),
                },
            })
        })
        .await
    }

    async fn transfer_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> Result<String> {
        let provider = self.signing_provider(signer);
        let tx = TransactionRequest::default()
            .with_from(signer.address())
            .with_to(to)
            .with_value(amount);

        let pending = self
            .bounded("send_native_transfer", async {
                provider
                    .send_transaction(tx)
                    .await
                    .map_err(|e| Error::EVMRpcError {
                        source: e,
                        loc: location!(),
                    })
            })
            .await?;

        debug!(
            chain = %self.config.chain_type,
            tx_hash = %pending.tx_hash(),
            %to,
            %amount,
            "Native transfer broadcast"
        );
        self.wait_for_receipt(pending).await
    }

    async fn transfer_token(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> Result<String> {
        let provider = self.signing_provider(signer);
        let token = GenericERC20Instance::new(self.config.token_address, &provider);

        let pending = self
            .bounded("send_token_transfer", async {
                token
                    .transfer(to, amount)
                    .from(signer.address())
                    .send()
                    .await
                    .map_err(|e| Error::ContractCall {
                        source: e,
                        loc: location!(),
                    })
            })
            .await?;

        debug!(
            chain = %self.config.chain_type,
            tx_hash = %pending.tx_hash(),
            %to,
            %amount,
            "Token transfer broadcast"
        );
        self.wait_for_receipt(pending).await
    }

    async fn broadcast_proof(&self, signer: &PrivateKeySigner, to: Address) -> Result<String> {
        let provider = self.signing_provider(signer);
        let tx = TransactionRequest::default()
            .with_from(signer.address())
            .with_to(to)
            .with_value(U256::ZERO);

        let pending = self
            .bounded("send_proof_transaction", async {
                provider
                    .send_transaction(tx)
                    .await
                    .map_err(|e| Error::EVMRpcError {
                        source: e,
                        loc: location!(),
                    })
            })
            .await?;

        Ok(format_hash(*pending.tx_hash()))
    }

    async fn incoming_transfers(
        &self,
        address: Address,
        since: DateTime<Utc>,
        page: u32,
    ) -> Result<TransferPage> {
        let query = TransferQuery {
            token: Some(self.config.token_address),
            min_timestamp: Some(since.timestamp().max(0) as u64),
            page: Some(page),
            limit: Some(self.config.indexer_page_limit),
        };

        let response = self
            .indexer
            .get_transfers_to(address, &query)
            .await
            .map_err(|e| Error::EVMTokenIndexerClientError {
                source: e,
                loc: location!(),
            })?;

        let mut transfers = Vec::with_capacity(response.transfers.len());
        for event in response.transfers {
            // the indexer is untrusted, re-check what it claims to have filtered
            if event.to != address || event.token != self.config.token_address {
                debug!(?event, "Dropping transfer that does not match the query");
                continue;
            }
            let Some(amount) = event.value() else {
                warn!(?event, "Dropping transfer with unparseable amount");
                continue;
            };
            let Some(block_timestamp) = DateTime::from_timestamp(event.timestamp as i64, 0) else {
                warn!(?event, "Dropping transfer with out of range timestamp");
                continue;
            };
            transfers.push(IncomingTransfer {
                tx_hash: format_hash(event.transaction_hash),
                from: event.from,
                to: event.to,
                amount,
                block_timestamp,
            });
        }

        Ok(TransferPage {
            transfers,
            has_more: response.pagination.has_next_page(),
        })
    }
}

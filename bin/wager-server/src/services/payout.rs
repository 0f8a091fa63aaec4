use std::sync::Arc;

use rust_decimal::Decimal;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;
use wager_chains::{canonical_address, ChainRegistry};
use wager_models::{decimal_to_token_units, ChainType, WalletRole, Withdrawal, WithdrawalStatus};

use crate::db::{RepositoryError, WithdrawalStore};
use crate::services::keyring::{KeyringError, PlatformKeyring};

pub const WITHDRAWALS_TOTAL_METRIC: &str = "wager_withdrawals_total";

#[derive(Debug, Snafu)]
pub enum PayoutError {
    #[snafu(display("Chain {chain} is not configured: {source}"))]
    ChainUnavailable {
        chain: ChainType,
        source: wager_chains::Error,
    },

    #[snafu(display("Invalid destination address {address} on {chain}"))]
    InvalidDestination { address: String, chain: ChainType },

    #[snafu(display("Amount {amount} has no token unit representation"))]
    UnpayableAmount { amount: Decimal },

    #[snafu(display("Payout wallet unavailable: {source}"))]
    PayoutWallet { source: KeyringError },

    #[snafu(display("Payout transfer failed: {source}"))]
    Transfer { source: wager_chains::Error },
}

impl PayoutError {
    /// Set when the transfer was broadcast but not confirmed; it may still pay out.
    pub fn unconfirmed_hash(&self) -> Option<&str> {
        match self {
            PayoutError::Transfer { source } => source.unconfirmed_hash(),
            _ => None,
        }
    }
}

/// Sends approved withdrawals from the treasury payout wallet.
///
/// Never touches the ledger; the caller decides what a failure means for the
/// withdrawal record.
pub struct PayoutExecutor {
    chains: Arc<ChainRegistry>,
    keyring: Arc<PlatformKeyring>,
    // one transfer at a time per executor so the payout wallet's nonces stay ordered
    send_lock: Mutex<()>,
}

impl PayoutExecutor {
    pub fn new(chains: Arc<ChainRegistry>, keyring: Arc<PlatformKeyring>) -> Self {
        Self {
            chains,
            keyring,
            send_lock: Mutex::new(()),
        }
    }

    /// Transfer `withdrawal.amount` to its destination. Returns the tx hash.
    pub async fn execute(&self, withdrawal: &Withdrawal) -> Result<String, PayoutError> {
        let chain_type = withdrawal.chain;
        let chain = self
            .chains
            .require(chain_type)
            .context(ChainUnavailableSnafu { chain: chain_type })?;

        let destination = canonical_address(&withdrawal.destination_address)
            .filter(|_| chain.validate_address(&withdrawal.destination_address))
            .context(InvalidDestinationSnafu {
                address: withdrawal.destination_address.clone(),
                chain: chain_type,
            })?;

        let amount = decimal_to_token_units(withdrawal.amount, chain.token_decimals())
            .filter(|units| !units.is_zero())
            .context(UnpayableAmountSnafu {
                amount: withdrawal.amount,
            })?;

        let signer = self
            .keyring
            .signer(chain_type, WalletRole::Payout)
            .await
            .context(PayoutWalletSnafu)?;

        let _guard = self.send_lock.lock().await;
        let tx_hash = chain
            .transfer_token(&signer, destination, amount)
            .await
            .context(TransferSnafu)?;

        info!(
            withdrawal_id = %withdrawal.id,
            chain = %chain_type,
            %destination,
            %amount,
            %tx_hash,
            "Withdrawal paid out"
        );
        Ok(tx_hash)
    }
}

#[derive(Debug, Snafu)]
pub enum WithdrawalError {
    #[snafu(display("Failed to claim withdrawal {withdrawal_id}: {source}"))]
    Claim {
        withdrawal_id: Uuid,
        source: RepositoryError,
    },

    #[snafu(display("Withdrawal {withdrawal_id} was sent in {tx_hash} but could not be recorded: {source}"))]
    RecordCompletion {
        withdrawal_id: Uuid,
        tx_hash: String,
        source: RepositoryError,
    },

    #[snafu(display("Failed to flag withdrawal {withdrawal_id} for review: {source}"))]
    FlagForReview {
        withdrawal_id: Uuid,
        source: RepositoryError,
    },
}

/// Drives a withdrawal from `pending` through payout to `completed`, or to
/// `manual_review` when the payout fails.
pub struct WithdrawalProcessor {
    store: Arc<dyn WithdrawalStore>,
    executor: Arc<PayoutExecutor>,
}

impl WithdrawalProcessor {
    pub fn new(store: Arc<dyn WithdrawalStore>, executor: Arc<PayoutExecutor>) -> Self {
        Self { store, executor }
    }

    pub async fn process(&self, withdrawal_id: Uuid) -> Result<Withdrawal, WithdrawalError> {
        let withdrawal = self
            .store
            .claim_withdrawal(withdrawal_id)
            .await
            .context(ClaimSnafu { withdrawal_id })?;

        let result = match self.executor.execute(&withdrawal).await {
            Ok(tx_hash) => self
                .store
                .complete_withdrawal(withdrawal_id, &tx_hash)
                .await
                .map_err(|source| {
                    // funds left the treasury; leave the row in processing for reconciliation
                    error!(%withdrawal_id, %tx_hash, "Payout sent but completion not recorded: {}", source);
                    WithdrawalError::RecordCompletion {
                        withdrawal_id,
                        tx_hash,
                        source,
                    }
                }),
            Err(e) => {
                let tx_hash = e.unconfirmed_hash();
                warn!(%withdrawal_id, ?tx_hash, "Payout failed, flagging for manual review: {}", e);
                self.store
                    .flag_for_manual_review(withdrawal_id, &e.to_string(), tx_hash)
                    .await
                    .context(FlagForReviewSnafu { withdrawal_id })
            }
        };

        let outcome = match &result {
            Ok(w) if w.status == WithdrawalStatus::Completed => "completed",
            Ok(_) => "manual_review",
            Err(_) => "error",
        };
        metrics::counter!(WITHDRAWALS_TOTAL_METRIC, "outcome" => outcome).increment(1);

        result
    }

    /// Process every pending withdrawal once. Returns how many were handled.
    pub async fn process_pending(&self) -> usize {
        let pending = match self.store.pending_withdrawals().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to list pending withdrawals: {}", e);
                return 0;
            }
        };

        let mut handled = 0;
        for withdrawal in pending {
            match self.process(withdrawal.id).await {
                Ok(_) => handled += 1,
                Err(e) => error!(withdrawal_id = %withdrawal.id, "Withdrawal processing failed: {}", e),
            }
        }
        handled
    }
}

pub fn spawn_withdrawal_processor(
    processor: Arc<WithdrawalProcessor>,
    poll_interval: Duration,
    join_set: &mut JoinSet<crate::Result<()>>,
) {
    join_set.spawn(async move {
        let mut tick = interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Starting withdrawal processor (interval: {:?})", poll_interval);

        loop {
            tick.tick().await;
            processor.process_pending().await;
        }
    });
}

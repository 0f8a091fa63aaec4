//! Sweeps token balances out of user deposit addresses into the collection
//! wallet.
//!
//! Fresh deposit addresses hold no native gas, so each address is first
//! topped up from the gas reserve when it falls below the activation
//! threshold; only then is the token balance checked and, above the minimum,
//! moved in full. Addresses are processed independently. A failure is
//! classified by its chain error: transient ones are retried in-round and then
//! deferred through `collection_retry_queue`, permanent ones park the address
//! until an operator clears its entry. A transfer that was broadcast without a
//! confirmed receipt is never resent in-round; the address is deferred.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use snafu::prelude::*;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wager_chains::{canonical_address, ChainOperations, FailureKind, KeyDerivationService};
use wager_models::{ChainType, CollectionRetryEntry, WalletRole};

use crate::db::{CollectionStore, CollectionTarget};
use crate::services::keyring::{KeyringError, PlatformKeyring};
use crate::services::retry::{retry_with_backoff, RetryPolicy};

pub const SWEEP_ADDRESSES_METRIC: &str = "wager_sweep_addresses_total";
pub const SWEEP_COLLECTED_METRIC: &str = "wager_sweep_collected_units_total";

#[derive(Debug, Clone)]
pub struct FundCollectorConfig {
    pub chain: ChainType,
    /// Native balance (wei) below which an address is topped up.
    pub gas_activation_threshold: U256,
    pub gas_top_up_amount: U256,
    /// Smallest token balance (token units) worth sweeping.
    pub min_collection_amount: U256,
    /// In-round retries of a single chain call.
    pub retry: RetryPolicy,
    /// Spacing of retry-queue attempts across rounds.
    pub requeue: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub topped_up: usize,
    pub collected: usize,
    /// Sum of swept token units.
    pub collected_amount: U256,
    /// Token balance below the collection minimum.
    pub skipped: usize,
    /// Retry entry not yet due.
    pub deferred: usize,
    pub parked: usize,
    pub transient_failures: usize,
    pub permanent_failures: usize,
}

#[derive(Debug, Snafu)]
enum SweepError {
    #[snafu(display("malformed deposit address {address}"))]
    MalformedAddress { address: String },

    #[snafu(display("{operation} failed: {source}"))]
    Chain {
        operation: &'static str,
        source: wager_chains::Error,
    },

    #[snafu(display("platform wallet unavailable: {source}"))]
    PlatformWallet { source: KeyringError },

    #[snafu(display("deposit key derivation failed: {source}"))]
    Derivation { source: wager_chains::Error },

    #[snafu(display("key at index {index} controls {derived}, not {address}"))]
    DerivedKeyMismatch {
        index: u32,
        derived: Address,
        address: Address,
    },
}

impl SweepError {
    fn kind(&self) -> FailureKind {
        match self {
            // may still land; balances are re-read next round instead of resending
            SweepError::Chain { source, .. } if source.unconfirmed_hash().is_some() => {
                FailureKind::Transient
            }
            SweepError::Chain { source, .. } => source.kind(),
            // the gas reserve is shared, its absence says nothing about this address
            SweepError::PlatformWallet { .. } => FailureKind::Transient,
            SweepError::MalformedAddress { .. }
            | SweepError::Derivation { .. }
            | SweepError::DerivedKeyMismatch { .. } => FailureKind::Permanent,
        }
    }
}

enum SweepOutcome {
    Collected(U256),
    BelowMinimum,
}

pub struct FundCollector {
    store: Arc<dyn CollectionStore>,
    chain: Arc<dyn ChainOperations>,
    keyring: Arc<PlatformKeyring>,
    key_derivation: Arc<KeyDerivationService>,
    config: FundCollectorConfig,
    running: AtomicBool,
}

impl FundCollector {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        chain: Arc<dyn ChainOperations>,
        keyring: Arc<PlatformKeyring>,
        key_derivation: Arc<KeyDerivationService>,
        config: FundCollectorConfig,
    ) -> Self {
        Self {
            store,
            chain,
            keyring,
            key_derivation,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// One pass over every deposit address. Returns `None` if a sweep is
    /// already running.
    pub async fn run_sweep(&self) -> Option<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(chain = %self.config.chain, "Sweep still running, skipping tick");
            return None;
        }

        let report = self.sweep_all().await;
        self.running.store(false, Ordering::Release);
        record_metrics(self.config.chain, &report);
        Some(report)
    }

    async fn sweep_all(&self) -> SweepReport {
        let chain = self.config.chain;
        let mut report = SweepReport::default();

        let targets = match self.store.collection_targets(chain).await {
            Ok(targets) => targets,
            Err(e) => {
                error!(%chain, "Failed to load deposit addresses for sweep: {}", e);
                return report;
            }
        };
        let entries: HashMap<Uuid, CollectionRetryEntry> = match self.store.retry_entries(chain).await {
            Ok(entries) => entries.into_iter().map(|e| (e.user_id, e)).collect(),
            Err(e) => {
                error!(%chain, "Failed to load collection retry queue: {}", e);
                return report;
            }
        };
        let treasury = match self.keyring.wallet_address(chain, WalletRole::Collection).await {
            Ok(treasury) => treasury,
            Err(e) => {
                error!(%chain, "No collection wallet, sweep aborted: {}", e);
                return report;
            }
        };

        let now = Utc::now();
        for target in targets {
            report.scanned += 1;
            let entry = entries.get(&target.user_id);

            match entry {
                Some(entry) if entry.is_parked() => {
                    report.parked += 1;
                    continue;
                }
                Some(entry) if !entry.is_due(now) => {
                    report.deferred += 1;
                    continue;
                }
                _ => {}
            }

            match self.sweep_address(&target, treasury, &mut report).await {
                Ok(outcome) => {
                    match outcome {
                        SweepOutcome::Collected(amount) => {
                            report.collected += 1;
                            report.collected_amount += amount;
                        }
                        SweepOutcome::BelowMinimum => report.skipped += 1,
                    }
                    if entry.is_some() {
                        if let Err(e) = self.store.clear_retry_entry(target.user_id, chain).await {
                            warn!(%chain, user_id = %target.user_id, "Failed to clear retry entry: {}", e);
                        }
                    }
                }
                Err(e) => self.record_failure(&target, entry, e, &mut report).await,
            }
        }

        info!(
            %chain,
            scanned = report.scanned,
            topped_up = report.topped_up,
            collected = report.collected,
            collected_amount = %report.collected_amount,
            skipped = report.skipped,
            deferred = report.deferred,
            parked = report.parked,
            transient_failures = report.transient_failures,
            permanent_failures = report.permanent_failures,
            "Sweep finished"
        );
        report
    }

    async fn sweep_address(
        &self,
        target: &CollectionTarget,
        treasury: Address,
        report: &mut SweepReport,
    ) -> Result<SweepOutcome, SweepError> {
        let chain = self.config.chain;
        let address = canonical_address(&target.address).context(MalformedAddressSnafu {
            address: target.address.clone(),
        })?;

        // 1. gas
        let native = self
            .with_retry("native_balance", || self.chain.native_balance(address))
            .await?;
        if native < self.config.gas_activation_threshold {
            let gas_reserve = self
                .keyring
                .signer(chain, WalletRole::GasReserve)
                .await
                .context(PlatformWalletSnafu)?;
            let tx_hash = self
                .with_retry("gas_top_up", || {
                    self.chain
                        .transfer_native(&gas_reserve, address, self.config.gas_top_up_amount)
                })
                .await?;
            report.topped_up += 1;
            info!(%chain, %address, %tx_hash, amount = %self.config.gas_top_up_amount, "Topped up deposit address gas");
        }

        // 2. token balance
        let balance = self
            .with_retry("token_balance", || self.chain.token_balance(address))
            .await?;
        if balance.is_zero() || balance < self.config.min_collection_amount {
            debug!(%chain, %address, %balance, "Token balance below collection minimum");
            return Ok(SweepOutcome::BelowMinimum);
        }

        // 3. sweep with the address's own key
        let signer = self
            .key_derivation
            .derive_signer(chain, target.deposit_path_index)
            .context(DerivationSnafu)?;
        ensure!(
            signer.address() == address,
            DerivedKeyMismatchSnafu {
                index: target.deposit_path_index,
                derived: signer.address(),
                address,
            }
        );

        let tx_hash = self
            .with_retry("token_sweep", || {
                self.chain.transfer_token(&signer, treasury, balance)
            })
            .await?;
        info!(%chain, %address, %tx_hash, %balance, "Swept deposit address");
        Ok(SweepOutcome::Collected(balance))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, SweepError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = wager_chains::Result<T>>,
    {
        retry_with_backoff(
            self.config.retry,
            operation,
            wager_chains::Error::is_transient,
            f,
        )
        .await
        .context(ChainSnafu { operation })
    }

    async fn record_failure(
        &self,
        target: &CollectionTarget,
        previous: Option<&CollectionRetryEntry>,
        error: SweepError,
        report: &mut SweepReport,
    ) {
        let chain = self.config.chain;
        let retry_count = previous.map_or(0, |e| e.retry_count);
        let kind = error.kind();

        let next_retry_at = match kind {
            FailureKind::Transient => {
                report.transient_failures += 1;
                let delay = chrono::Duration::from_std(self.config.requeue.deferral(retry_count))
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                warn!(%chain, user_id = %target.user_id, address = %target.address, retry_count, "Sweep deferred: {}", error);
                Some(Utc::now() + delay)
            }
            FailureKind::Permanent => {
                report.permanent_failures += 1;
                error!(%chain, user_id = %target.user_id, address = %target.address, "Sweep parked: {}", error);
                None
            }
        };

        let entry = CollectionRetryEntry {
            user_id: target.user_id,
            chain,
            retry_count: retry_count.saturating_add(1),
            error_reason: error.to_string(),
            next_retry_at,
        };
        if let Err(e) = self.store.save_retry_entry(&entry).await {
            error!(%chain, user_id = %target.user_id, "Failed to record sweep failure: {}", e);
        }
    }
}

fn record_metrics(chain: ChainType, report: &SweepReport) {
    let chain = chain.to_string();
    for (outcome, count) in [
        ("topped_up", report.topped_up),
        ("collected", report.collected),
        ("skipped", report.skipped),
        ("deferred", report.deferred),
        ("parked", report.parked),
        ("transient_failure", report.transient_failures),
        ("permanent_failure", report.permanent_failures),
    ] {
        metrics::counter!(SWEEP_ADDRESSES_METRIC, "chain" => chain.clone(), "outcome" => outcome)
            .increment(count as u64);
    }
    metrics::counter!(SWEEP_COLLECTED_METRIC, "chain" => chain)
        .increment(report.collected_amount.saturating_to::<u64>());
}

/// Spawns the periodic sweep for one chain.
pub fn spawn_fund_collector(
    collector: Arc<FundCollector>,
    collection_interval: Duration,
    join_set: &mut JoinSet<crate::Result<()>>,
) {
    join_set.spawn(async move {
        let mut tick = interval(collection_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            chain = %collector.config.chain,
            "Starting fund collector (interval: {:?})",
            collection_interval
        );

        loop {
            tick.tick().await;
            collector.run_sweep().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{
        add_standard_wallets, addr, dec, test_settings, MemoryStore, MockChain, COLLECTION_ADDRESS,
        HARDHAT_ADDRESS_0,
    };

    const CHAIN: ChainType = ChainType::Ethereum;
    const FUNDED_GAS: u64 = 1_000_000;

    struct Harness {
        store: Arc<MemoryStore>,
        chain: Arc<MockChain>,
        key_derivation: Arc<KeyDerivationService>,
        collector: FundCollector,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::default());
            add_standard_wallets(&store, CHAIN);
            let settings = Arc::new(test_settings());
            let key_derivation = settings.key_derivation();
            let chain = Arc::new(MockChain::new(CHAIN));
            let keyring = Arc::new(PlatformKeyring::new(settings, store.clone()));
            let collector = FundCollector::new(
                store.clone(),
                chain.clone(),
                keyring,
                key_derivation.clone(),
                FundCollectorConfig {
                    chain: CHAIN,
                    gas_activation_threshold: U256::from(1_000u64),
                    gas_top_up_amount: U256::from(50_000u64),
                    min_collection_amount: U256::from(1_000_000u64),
                    retry: RetryPolicy::new(2, Duration::from_millis(1)),
                    requeue: RetryPolicy::new(1, Duration::from_secs(60)),
                },
            );
            Self {
                store,
                chain,
                key_derivation,
                collector,
            }
        }

        /// A user whose stored address is the one derived for `index`.
        fn deposit_user(&self, index: u32) -> (Uuid, Address) {
            let address = self.key_derivation.derive_address(CHAIN, index).unwrap();
            let user = self
                .store
                .add_user_at(dec("0"), index, vec![(CHAIN, format!("{address:#x}"))]);
            (user, address)
        }
    }

    #[tokio::test]
    async fn test_empty_address_is_topped_up_but_not_swept() {
        let h = Harness::new();
        let (_, address) = h.deposit_user(1);

        let report = h.collector.run_sweep().await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.topped_up, 1);
        assert_eq!(report.collected, 0);
        assert_eq!(report.skipped, 1);
        let top_ups = h.chain.native_transfers();
        assert_eq!(top_ups.len(), 1);
        assert_eq!(top_ups[0].from, addr(HARDHAT_ADDRESS_0));
        assert_eq!(top_ups[0].to, address);
        assert_eq!(h.chain.native(address), U256::from(50_000u64));
        assert!(h.chain.token_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_funded_address_is_swept_in_full() {
        let h = Harness::new();
        let (_, address) = h.deposit_user(1);
        h.chain.set_native(address, U256::from(FUNDED_GAS));
        h.chain.set_token(address, U256::from(5_000_000u64));

        let report = h.collector.run_sweep().await.unwrap();

        assert_eq!(report.topped_up, 0);
        assert_eq!(report.collected, 1);
        assert_eq!(report.collected_amount, U256::from(5_000_000u64));
        assert_eq!(h.chain.token(address), U256::ZERO);
        assert_eq!(h.chain.token(addr(COLLECTION_ADDRESS)), U256::from(5_000_000u64));
    }

    #[tokio::test]
    async fn test_gas_is_topped_up_before_sweep() {
        let h = Harness::new();
        let (_, address) = h.deposit_user(3);
        h.chain.set_token(address, U256::from(2_000_000u64));

        let report = h.collector.run_sweep().await.unwrap();

        assert_eq!(report.topped_up, 1);
        assert_eq!(report.collected, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(h.chain.token_transfers()[0].from, address);
    }

    #[tokio::test]
    async fn test_permanent_failure_parks_only_that_address() {
        let h = Harness::new();
        let (_, first) = h.deposit_user(1);
        let (broken_user, broken) = h.deposit_user(2);
        let (_, third) = h.deposit_user(3);
        for address in [first, broken, third] {
            h.chain.set_native(address, U256::from(FUNDED_GAS));
            h.chain.set_token(address, U256::from(3_000_000u64));
        }
        h.chain.fail_address(broken, FailureKind::Permanent, usize::MAX);

        let report = h.collector.run_sweep().await.unwrap();

        assert_eq!(report.collected, 2);
        assert_eq!(report.permanent_failures, 1);
        let entry = h.store.retry_entry(broken_user, CHAIN).unwrap();
        assert!(entry.is_parked());
        assert_eq!(entry.retry_count, 1);

        let report = h.collector.run_sweep().await.unwrap();
        assert_eq!(report.parked, 1);
        assert_eq!(report.permanent_failures, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_deferred_then_collected_when_due() {
        let h = Harness::new();
        let (user, address) = h.deposit_user(1);
        h.chain.set_native(address, U256::from(FUNDED_GAS));
        h.chain.set_token(address, U256::from(4_000_000u64));
        h.chain.fail_address(address, FailureKind::Transient, 2);

        let report = h.collector.run_sweep().await.unwrap();
        assert_eq!(report.transient_failures, 1);
        let entry = h.store.retry_entry(user, CHAIN).unwrap();
        assert!(!entry.is_parked());
        assert!(!entry.is_due(Utc::now()));

        let report = h.collector.run_sweep().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.collected, 0);

        h.store.set_retry_entry(CollectionRetryEntry {
            next_retry_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..entry
        });
        let report = h.collector.run_sweep().await.unwrap();
        assert_eq!(report.collected, 1);
        assert!(h.store.retry_entry(user, CHAIN).is_none());
    }

    #[tokio::test]
    async fn test_single_transient_failure_is_retried_in_round() {
        let h = Harness::new();
        let (user, address) = h.deposit_user(1);
        h.chain.set_native(address, U256::from(FUNDED_GAS));
        h.chain.set_token(address, U256::from(4_000_000u64));
        h.chain.fail_address(address, FailureKind::Transient, 1);

        let report = h.collector.run_sweep().await.unwrap();

        assert_eq!(report.collected, 1);
        assert_eq!(report.transient_failures, 0);
        assert!(h.store.retry_entry(user, CHAIN).is_none());
    }

    #[tokio::test]
    async fn test_malformed_or_foreign_address_is_parked() {
        let h = Harness::new();
        let malformed = h
            .store
            .add_user_at(dec("0"), 1, vec![(CHAIN, "not-an-address".to_string())]);
        let foreign_address = Address::repeat_byte(0x42);
        let foreign = h
            .store
            .add_user_at(dec("0"), 2, vec![(CHAIN, format!("{foreign_address:#x}"))]);
        h.chain.set_native(foreign_address, U256::from(FUNDED_GAS));
        h.chain.set_token(foreign_address, U256::from(9_000_000u64));

        let report = h.collector.run_sweep().await.unwrap();

        assert_eq!(report.permanent_failures, 2);
        assert!(h.store.retry_entry(malformed, CHAIN).unwrap().is_parked());
        assert!(h.store.retry_entry(foreign, CHAIN).unwrap().is_parked());
        assert_eq!(h.chain.token(foreign_address), U256::from(9_000_000u64));
    }

    #[tokio::test]
    async fn test_unconfirmed_top_up_is_not_resent() {
        let h = Harness::new();
        let (user, address) = h.deposit_user(1);
        h.chain.set_token(address, U256::from(2_000_000u64));
        h.chain.lose_receipts_to(address, 1);

        let report = h.collector.run_sweep().await.unwrap();

        assert_eq!(report.topped_up, 0);
        assert_eq!(report.transient_failures, 1);
        assert_eq!(h.chain.native_transfers().len(), 1);
        assert!(h.chain.token_transfers().is_empty());
        let entry = h.store.retry_entry(user, CHAIN).unwrap();
        assert!(!entry.is_parked());

        // the top-up landed after all; the next attempt sweeps without funding again
        h.store.set_retry_entry(CollectionRetryEntry {
            next_retry_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..entry
        });
        let report = h.collector.run_sweep().await.unwrap();
        assert_eq!(report.topped_up, 0);
        assert_eq!(report.collected, 1);
        assert_eq!(h.chain.native_transfers().len(), 1);
        assert!(h.store.retry_entry(user, CHAIN).is_none());
    }
}

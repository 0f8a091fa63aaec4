use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wager_chains::{canonical_address, ChainOperations, IncomingTransfer};
use wager_models::{token_units_to_decimal, ChainType, Notification};

use crate::db::{DepositStore, RepositoryError};
use crate::notifications::NotificationHub;

pub const DEPOSITS_CREDITED_METRIC: &str = "wager_deposits_credited_total";
pub const DEPOSIT_SCAN_FAILURES_METRIC: &str = "wager_deposit_scan_failures_total";

#[derive(Debug, Clone)]
pub struct DepositListenerConfig {
    pub chain: ChainType,
    /// How far back the first round looks.
    pub initial_lookback: Duration,
    /// Upper bound on indexer pages fetched per address per round.
    pub max_pages: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositRoundReport {
    pub addresses_scanned: usize,
    pub transfers_seen: usize,
    pub credited: usize,
    pub duplicates: usize,
    /// Zero amounts, unrepresentable amounts and transfers to unknown addresses.
    pub ignored: usize,
    pub failed_addresses: usize,
    /// Addresses that hit the page limit and resume from a cursor next round.
    pub truncated_addresses: usize,
}

/// Where a truncated address resumes: the floor it was queried with and the
/// first unread page under that floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageCursor {
    since: DateTime<Utc>,
    page: u32,
}

struct ScanState {
    watermark: DateTime<Utc>,
    cursors: HashMap<Address, PageCursor>,
}

enum TransferOutcome {
    Credited,
    Duplicate,
    Ignored,
}

/// Polls the indexer for token transfers into user deposit addresses and
/// credits each one exactly once.
///
/// All addresses share one time watermark. An address with more pages than a
/// round may fetch keeps its own cursor, so its remainder is read under the
/// floor it started from even after the shared watermark has moved on.
pub struct DepositListener {
    store: Arc<dyn DepositStore>,
    chain: Arc<dyn ChainOperations>,
    notifications: Arc<NotificationHub>,
    config: DepositListenerConfig,
    state: Mutex<ScanState>,
    running: AtomicBool,
}

impl DepositListener {
    pub fn new(
        store: Arc<dyn DepositStore>,
        chain: Arc<dyn ChainOperations>,
        notifications: Arc<NotificationHub>,
        config: DepositListenerConfig,
    ) -> Self {
        let lookback = chrono::Duration::from_std(config.initial_lookback)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            store,
            chain,
            notifications,
            state: Mutex::new(ScanState {
                watermark: Utc::now() - lookback,
                cursors: HashMap::new(),
            }),
            config,
            running: AtomicBool::new(false),
        }
    }

    pub async fn watermark(&self) -> DateTime<Utc> {
        self.state.lock().await.watermark
    }

    /// Scan every deposit address once. Returns `None` if a round is already
    /// in progress.
    pub async fn run_round(&self) -> Option<DepositRoundReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(chain = %self.config.chain, "Deposit round still running, skipping tick");
            return None;
        }

        let report = self.scan_all().await;
        self.running.store(false, Ordering::Release);
        Some(report)
    }

    async fn scan_all(&self) -> DepositRoundReport {
        let chain = self.config.chain;
        let mut report = DepositRoundReport::default();

        let targets = match self.store.deposit_targets(chain).await {
            Ok(targets) => targets,
            Err(e) => {
                error!(%chain, "Failed to load deposit addresses: {}", e);
                return report;
            }
        };

        let mut owners: HashMap<Address, Uuid> = HashMap::with_capacity(targets.len());
        for target in targets {
            match canonical_address(&target.address) {
                Some(address) => {
                    owners.insert(address, target.user_id);
                }
                None => warn!(%chain, user_id = %target.user_id, address = %target.address, "Stored deposit address is unparseable"),
            }
        }

        let (since, mut cursors) = {
            let state = self.state.lock().await;
            (state.watermark, state.cursors.clone())
        };
        cursors.retain(|address, _| owners.contains_key(address));
        let mut latest_seen: Option<DateTime<Utc>> = None;

        for (&address, &user_id) in &owners {
            report.addresses_scanned += 1;
            let start = cursors
                .get(&address)
                .copied()
                .unwrap_or(PageCursor { since, page: 1 });

            match self
                .scan_address(address, start, &owners, &mut report, &mut latest_seen)
                .await
            {
                Ok(Some(resume)) => {
                    report.truncated_addresses += 1;
                    cursors.insert(address, resume);
                }
                Ok(None) => {
                    cursors.remove(&address);
                }
                Err(e) => {
                    report.failed_addresses += 1;
                    metrics::counter!(DEPOSIT_SCAN_FAILURES_METRIC, "chain" => chain.to_string())
                        .increment(1);
                    warn!(%chain, %address, %user_id, "Deposit scan failed for address: {}", e);
                }
            }
        }

        let mut state = self.state.lock().await;
        state.cursors = cursors;
        // a failed address may still have unseen transfers below the new mark
        if report.failed_addresses == 0 {
            if let Some(latest) = latest_seen {
                let next = latest + chrono::Duration::seconds(1);
                if next > state.watermark {
                    state.watermark = next;
                }
            }
        }
        drop(state);

        info!(
            %chain,
            addresses = report.addresses_scanned,
            seen = report.transfers_seen,
            credited = report.credited,
            duplicates = report.duplicates,
            ignored = report.ignored,
            failed = report.failed_addresses,
            truncated = report.truncated_addresses,
            "Deposit round finished"
        );
        report
    }

    /// Reads up to `max_pages` pages starting at `start`. Returns the cursor to
    /// resume from when the indexer still has more.
    async fn scan_address(
        &self,
        address: Address,
        start: PageCursor,
        owners: &HashMap<Address, Uuid>,
        report: &mut DepositRoundReport,
        latest_seen: &mut Option<DateTime<Utc>>,
    ) -> Result<Option<PageCursor>, ScanError> {
        let last_page = start
            .page
            .saturating_add(self.config.max_pages.max(1) - 1);
        for page in start.page..=last_page {
            let batch = self
                .chain
                .incoming_transfers(address, start.since, page)
                .await
                .context(IndexerSnafu)?;

            for transfer in &batch.transfers {
                report.transfers_seen += 1;
                if latest_seen.is_none_or(|seen| transfer.block_timestamp > seen) {
                    *latest_seen = Some(transfer.block_timestamp);
                }

                match self.ingest(transfer, owners).await? {
                    TransferOutcome::Credited => report.credited += 1,
                    TransferOutcome::Duplicate => report.duplicates += 1,
                    TransferOutcome::Ignored => report.ignored += 1,
                }
            }

            if !batch.has_more {
                return Ok(None);
            }
        }

        let resume = PageCursor {
            since: start.since,
            page: last_page.saturating_add(1),
        };
        debug!(%address, next_page = resume.page, since = %resume.since, "Page limit reached, resuming next round");
        Ok(Some(resume))
    }

    async fn ingest(
        &self,
        transfer: &IncomingTransfer,
        owners: &HashMap<Address, Uuid>,
    ) -> Result<TransferOutcome, ScanError> {
        let chain = self.config.chain;

        let Some(&user_id) = owners.get(&transfer.to) else {
            return Ok(TransferOutcome::Ignored);
        };
        if transfer.amount == U256::ZERO {
            return Ok(TransferOutcome::Ignored);
        }
        let Some(amount) = token_units_to_decimal(transfer.amount, self.chain.token_decimals())
        else {
            warn!(%chain, tx_hash = %transfer.tx_hash, amount = %transfer.amount, "Unrepresentable deposit amount");
            return Ok(TransferOutcome::Ignored);
        };

        if self
            .store
            .deposit_exists(chain, &transfer.tx_hash)
            .await
            .context(LedgerSnafu)?
        {
            return Ok(TransferOutcome::Duplicate);
        }

        // the unique (chain, tx_hash) index catches a race past the check above
        let Some(balance) = self
            .store
            .credit_deposit(user_id, chain, &transfer.tx_hash, amount)
            .await
            .context(LedgerSnafu)?
        else {
            return Ok(TransferOutcome::Duplicate);
        };

        info!(%chain, %user_id, tx_hash = %transfer.tx_hash, %amount, "Deposit credited");
        metrics::counter!(DEPOSITS_CREDITED_METRIC, "chain" => chain.to_string()).increment(1);

        self.notifications.publish(
            user_id,
            Notification::DepositCredited {
                chain,
                tx_hash: transfer.tx_hash.clone(),
                amount,
            },
        );
        self.notifications
            .publish(user_id, Notification::BalanceUpdated { balance });

        Ok(TransferOutcome::Credited)
    }
}

#[derive(Debug, Snafu)]
enum ScanError {
    #[snafu(display("indexer query failed: {source}"))]
    Indexer { source: wager_chains::Error },

    #[snafu(display("ledger access failed: {source}"))]
    Ledger { source: RepositoryError },
}

/// Spawns the polling loop for one chain's listener.
pub fn spawn_deposit_listener(
    listener: Arc<DepositListener>,
    poll_interval: Duration,
    join_set: &mut JoinSet<crate::Result<()>>,
) {
    join_set.spawn(async move {
        let mut tick = interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            chain = %listener.config.chain,
            "Starting deposit listener (interval: {:?})",
            poll_interval
        );

        loop {
            tick.tick().await;
            listener.run_round().await;
        }
    });
}

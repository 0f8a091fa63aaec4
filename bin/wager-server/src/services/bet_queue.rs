//! Serialized wager settlement.
//!
//! Every bet runs three phases: reserve the stake, broadcast a proof
//! transaction between two fixed platform wallets, then settle against the
//! proof hash's trailing digit. A single consumer task drains the queue so
//! proofs are never broadcast concurrently from the same wallet, and any
//! failure after the reserve is compensated by refunding the stake. Stakes whose
//! refund could not be written are retried by a recovery pass that runs at
//! startup and then periodically between bets.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use snafu::prelude::*;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;
use wager_chains::ChainRegistry;
use wager_models::{Bet, BetChoice, BetStatus, ChainType, Notification, WalletRole};

use crate::db::{BetStore, BetWithBalance, RepositoryError};
use crate::notifications::NotificationHub;
use crate::services::keyring::{KeyringError, PlatformKeyring};
use crate::services::retry::{retry_with_backoff, RetryPolicy};

pub const BETS_TOTAL_METRIC: &str = "wager_bets_total";
pub const BET_SETTLEMENT_DURATION_METRIC: &str = "wager_bet_settlement_seconds";
pub const BET_QUEUE_DEPTH_METRIC: &str = "wager_bet_queue_depth";

/// Reason recorded on bets refunded by a recovery pass.
pub const INTERRUPTED_REASON: &str = "interrupted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetRequest {
    pub user_id: Uuid,
    pub choice: BetChoice,
    pub amount: Decimal,
}

/// Terminal bet record and the owner's balance after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetReceipt {
    pub bet: Bet,
    pub balance: Decimal,
}

impl From<BetWithBalance> for BetReceipt {
    fn from(value: BetWithBalance) -> Self {
        Self {
            bet: value.bet,
            balance: value.balance,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum BetError {
    #[snafu(display("Bet rejected: {source}"))]
    Rejected { source: RepositoryError },

    #[snafu(display("Failed to reserve bet: {source}"))]
    Reserve { source: RepositoryError },

    #[snafu(display("Bet {bet_id} failed ({reason}) and its refund could not be written yet"))]
    RefundPending { bet_id: Uuid, reason: String },

    #[snafu(display("Bet settlement queue is not running"))]
    QueueClosed,
}

impl BetError {
    pub fn is_business_rule_violation(&self) -> bool {
        matches!(self, BetError::Rejected { .. })
    }
}

#[derive(Debug, Snafu)]
enum ProofError {
    #[snafu(display("proof chain {chain} is not configured"))]
    ProofChain { source: wager_chains::Error, chain: ChainType },

    #[snafu(display("proof wallet unavailable: {source}"))]
    ProofWallet { source: KeyringError },

    #[snafu(display("proof broadcast failed: {source}"))]
    Broadcast { source: wager_chains::Error },

    #[snafu(display("proof hash {tx_hash} has no trailing hex digit"))]
    UnreadableProof { tx_hash: String },
}

#[derive(Debug, Clone)]
pub struct BetQueueConfig {
    pub proof_chain: ChainType,
    pub payout_multiplier: Decimal,
    pub refund_retry: RetryPolicy,
    /// Spacing of recovery passes after the one at startup.
    pub recovery_interval: Duration,
}

struct QueuedBet {
    request: BetRequest,
    response_tx: oneshot::Sender<Result<BetReceipt, BetError>>,
}

/// Bets handed to the consumer and not yet taken, mirrored into the gauge.
#[derive(Clone, Default)]
struct QueueDepth(Arc<AtomicI64>);

impl QueueDepth {
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
        metrics::gauge!(BET_QUEUE_DEPTH_METRIC).increment(1.0);
    }

    fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        metrics::gauge!(BET_QUEUE_DEPTH_METRIC).decrement(1.0);
    }

    fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Producer handle. Cheap to clone; every clone feeds the same consumer.
#[derive(Clone)]
pub struct BetSettlementQueue {
    request_tx: mpsc::UnboundedSender<QueuedBet>,
    depth: QueueDepth,
}

impl BetSettlementQueue {
    /// Start the consumer. It refunds bets left pending by a previous process
    /// before taking new work, and repeats that pass every
    /// `recovery_interval` so a refund that failed is not left waiting for a
    /// restart. Recovery runs on the consumer, never beside an in-flight bet.
    pub fn spawn(settler: BetSettler, join_set: &mut JoinSet<crate::Result<()>>) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<QueuedBet>();
        let depth = QueueDepth::default();
        let consumer_depth = depth.clone();

        join_set.spawn(async move {
            let recovered = settler.recover_pending().await;
            info!(recovered, "Bet settlement queue started");

            let period = settler.config.recovery_interval.max(Duration::from_millis(1));
            let mut recovery = interval_at(Instant::now() + period, period);
            recovery.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    queued = request_rx.recv() => {
                        let Some(queued) = queued else { break };
                        consumer_depth.decrement();
                        let result = settler.process(queued.request).await;
                        if queued.response_tx.send(result).is_err() {
                            warn!("Bet submitter went away before settlement finished");
                        }
                    }
                    _ = recovery.tick() => {
                        let recovered = settler.recover_pending().await;
                        if recovered > 0 {
                            info!(recovered, "Recovery pass refunded pending bets");
                        }
                    }
                }
            }

            info!("Bet settlement queue stopped");
            Ok(())
        });

        Self { request_tx, depth }
    }

    /// Bets waiting for the consumer.
    #[must_use]
    pub fn depth(&self) -> i64 {
        self.depth.get()
    }

    /// Queue a bet and wait for it to reach a terminal state.
    pub async fn submit(&self, request: BetRequest) -> Result<BetReceipt, BetError> {
        let (response_tx, response_rx) = oneshot::channel();

        // counted before the send so the consumer's decrement never runs first
        self.depth.increment();
        if self
            .request_tx
            .send(QueuedBet {
                request,
                response_tx,
            })
            .is_err()
        {
            self.depth.decrement();
            return Err(BetError::QueueClosed);
        }

        response_rx.await.map_err(|_| BetError::QueueClosed)?
    }
}

/// The single consumer behind [`BetSettlementQueue`].
pub struct BetSettler {
    store: Arc<dyn BetStore>,
    chains: Arc<ChainRegistry>,
    keyring: Arc<PlatformKeyring>,
    notifications: Arc<NotificationHub>,
    config: BetQueueConfig,
}

impl BetSettler {
    pub fn new(
        store: Arc<dyn BetStore>,
        chains: Arc<ChainRegistry>,
        keyring: Arc<PlatformKeyring>,
        notifications: Arc<NotificationHub>,
        config: BetQueueConfig,
    ) -> Self {
        Self {
            store,
            chains,
            keyring,
            notifications,
            config,
        }
    }

    /// Refund every bet still pending from an earlier run. Returns how many
    /// were refunded.
    pub async fn recover_pending(&self) -> usize {
        let pending = match self.store.pending_bets().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to list pending bets for recovery: {}", e);
                return 0;
            }
        };

        let mut recovered = 0;
        for bet in pending {
            warn!(bet_id = %bet.id, user_id = %bet.user_id, "Refunding bet left pending");
            if self.compensate(&bet, INTERRUPTED_REASON.to_string()).await.is_ok() {
                recovered += 1;
            }
        }
        recovered
    }

    pub async fn process(&self, request: BetRequest) -> Result<BetReceipt, BetError> {
        let started = Instant::now();
        let result = self.run_phases(request).await;

        let status = match &result {
            Ok(receipt) => status_label(receipt.bet.status),
            Err(BetError::Rejected { .. }) => "rejected",
            Err(_) => "error",
        };
        metrics::counter!(BETS_TOTAL_METRIC, "status" => status).increment(1);
        metrics::histogram!(BET_SETTLEMENT_DURATION_METRIC).record(started.elapsed().as_secs_f64());

        result
    }

    async fn run_phases(&self, request: BetRequest) -> Result<BetReceipt, BetError> {
        let BetRequest {
            user_id,
            choice,
            amount,
        } = request;

        // Phase 1: reserve
        let reserved = self
            .store
            .reserve_bet(user_id, choice, amount, self.config.payout_multiplier)
            .await
            .map_err(|source| {
                if source.is_business_rule_violation() {
                    BetError::Rejected { source }
                } else {
                    BetError::Reserve { source }
                }
            })?;
        let bet = reserved.bet;
        info!(bet_id = %bet.id, %user_id, ?choice, %amount, "Bet reserved");
        self.notify(
            user_id,
            Notification::BetPlaced {
                bet_id: bet.id,
                choice,
                amount,
            },
            reserved.balance,
        );

        // Phase 2: proof. No lock is held while the broadcast is in flight.
        let proof = match self.broadcast_proof().await {
            Ok(proof) => proof,
            Err(e) => {
                warn!(bet_id = %bet.id, "Proof phase failed: {}", e);
                return self.compensate(&bet, e.to_string()).await;
            }
        };

        // Phase 3: settle
        let outcome = match BetChoice::from_proof_hash(&proof) {
            Some(outcome) => outcome,
            None => {
                let e = ProofError::UnreadableProof { tx_hash: proof };
                return self.compensate(&bet, e.to_string()).await;
            }
        };

        match self.store.settle_bet(bet.id, outcome, &proof).await {
            Ok(settled) => {
                let payout = settled.bet.payout.unwrap_or(Decimal::ZERO);
                self.notify(
                    user_id,
                    Notification::BetSettled {
                        bet_id: bet.id,
                        status: settled.bet.status,
                        outcome,
                        payout,
                        proof_tx_hash: proof,
                    },
                    settled.balance,
                );
                Ok(settled.into())
            }
            Err(e) => {
                // the proof carries no value, so undoing the stake is safe
                error!(bet_id = %bet.id, proof_tx_hash = %proof, "Settlement write failed after proof: {}", e);
                self.compensate(&bet, format!("settlement failed: {e}")).await
            }
        }
    }

    async fn broadcast_proof(&self) -> Result<String, ProofError> {
        let chain_type = self.config.proof_chain;
        let chain = self
            .chains
            .require(chain_type)
            .context(ProofChainSnafu { chain: chain_type })?;
        let signer = self
            .keyring
            .signer(chain_type, WalletRole::ProofOpenerA)
            .await
            .context(ProofWalletSnafu)?;
        let counterparty = self
            .keyring
            .wallet_address(chain_type, WalletRole::ProofOpenerB)
            .await
            .context(ProofWalletSnafu)?;

        chain
            .broadcast_proof(&signer, counterparty)
            .await
            .context(BroadcastSnafu)
    }

    async fn compensate(&self, bet: &Bet, reason: String) -> Result<BetReceipt, BetError> {
        let refunded = retry_with_backoff(
            self.config.refund_retry,
            "refund_bet",
            |e: &RepositoryError| matches!(e, RepositoryError::Database { .. }),
            || self.store.refund_bet(bet.id, &reason),
        )
        .await;

        match refunded {
            Err(RepositoryError::BetNotPending { status, .. }) => {
                // an earlier write reached a terminal state but its result was lost
                warn!(bet_id = %bet.id, ?status, "Bet already closed, not refunding");
                self.closed_receipt(bet).await
            }
            Ok(refunded) => {
                self.notify(
                    bet.user_id,
                    Notification::BetFailed {
                        bet_id: bet.id,
                        refunded: bet.amount,
                        reason,
                    },
                    refunded.balance,
                );
                Ok(refunded.into())
            }
            Err(e) => {
                error!(
                    bet_id = %bet.id,
                    user_id = %bet.user_id,
                    "Refund failed, bet left pending for recovery: {}", e
                );
                Err(BetError::RefundPending {
                    bet_id: bet.id,
                    reason,
                })
            }
        }
    }

    async fn closed_receipt(&self, bet: &Bet) -> Result<BetReceipt, BetError> {
        let stored = match self.store.bet_with_balance(bet.id).await {
            Ok(Some(stored)) if stored.bet.status.is_terminal() => stored,
            Ok(_) => {
                return Err(BetError::RefundPending {
                    bet_id: bet.id,
                    reason: "bet state changed during refund".to_string(),
                })
            }
            Err(e) => {
                error!(bet_id = %bet.id, "Failed to read closed bet: {}", e);
                return Err(BetError::RefundPending {
                    bet_id: bet.id,
                    reason: e.to_string(),
                });
            }
        };

        if let (Some(outcome), Some(proof_tx_hash)) =
            (stored.bet.outcome, stored.bet.proof_tx_hash.clone())
        {
            self.notify(
                bet.user_id,
                Notification::BetSettled {
                    bet_id: bet.id,
                    status: stored.bet.status,
                    outcome,
                    payout: stored.bet.payout.unwrap_or(Decimal::ZERO),
                    proof_tx_hash,
                },
                stored.balance,
            );
        }
        Ok(stored.into())
    }

    fn notify(&self, user_id: Uuid, notification: Notification, balance: Decimal) {
        self.notifications.publish(user_id, notification);
        self.notifications
            .publish(user_id, Notification::BalanceUpdated { balance });
    }
}

fn status_label(status: BetStatus) -> &'static str {
    match status {
        BetStatus::Pending => "pending",
        BetStatus::Won => "won",
        BetStatus::Lost => "lost",
        BetStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{
        add_standard_wallets, addr, dec, test_settings, MemoryStore, MockChain,
        HARDHAT_ADDRESS_0, HARDHAT_ADDRESS_1,
    };
    use std::time::Duration;
    use wager_chains::FailureKind;

    const CHAIN: ChainType = ChainType::Ethereum;

    struct Harness {
        store: Arc<MemoryStore>,
        chain: Arc<MockChain>,
        notifications: Arc<NotificationHub>,
        settler: BetSettler,
    }

    fn harness(chain: MockChain) -> Harness {
        let store = Arc::new(MemoryStore::default());
        add_standard_wallets(&store, CHAIN);
        let chain = Arc::new(chain);
        let mut registry = ChainRegistry::new();
        registry.register(CHAIN, chain.clone());
        let notifications = Arc::new(NotificationHub::new());
        let keyring = Arc::new(PlatformKeyring::new(
            Arc::new(test_settings()),
            store.clone(),
        ));
        let settler = BetSettler::new(
            store.clone(),
            Arc::new(registry),
            keyring,
            notifications.clone(),
            BetQueueConfig {
                proof_chain: CHAIN,
                payout_multiplier: dec("1.95"),
                refund_retry: RetryPolicy::new(3, Duration::from_millis(1)),
                recovery_interval: Duration::from_millis(20),
            },
        );
        Harness {
            store,
            chain,
            notifications,
            settler,
        }
    }

    fn head(user_id: Uuid, amount: &str) -> BetRequest {
        BetRequest {
            user_id,
            choice: BetChoice::Head,
            amount: dec(amount),
        }
    }

    #[tokio::test]
    async fn test_even_proof_digit_wins_for_head() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        let mut inbox = h.notifications.connect(user);
        h.chain.push_proof("0x00000000000000000000000000000000000000000000000000000000000abc04");

        let receipt = h.settler.process(head(user, "40")).await.unwrap();

        assert_eq!(receipt.bet.status, BetStatus::Won);
        assert_eq!(receipt.bet.outcome, Some(BetChoice::Head));
        assert_eq!(receipt.bet.payout, Some(dec("78")));
        assert_eq!(receipt.balance, dec("138"));
        assert_eq!(h.store.balance(user), dec("138"));
        assert_eq!(h.store.user(user).streaks.win_streak, 1);

        assert!(matches!(inbox.try_recv().unwrap(), Notification::BetPlaced { .. }));
        assert_eq!(
            inbox.try_recv().unwrap(),
            Notification::BalanceUpdated { balance: dec("60") }
        );
        assert!(matches!(
            inbox.try_recv().unwrap(),
            Notification::BetSettled { status: BetStatus::Won, .. }
        ));
        assert_eq!(
            inbox.try_recv().unwrap(),
            Notification::BalanceUpdated { balance: dec("138") }
        );
    }

    #[tokio::test]
    async fn test_odd_proof_digit_loses_for_head() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        h.chain.push_proof("0x00000000000000000000000000000000000000000000000000000000000abc07");

        let receipt = h.settler.process(head(user, "40")).await.unwrap();

        assert_eq!(receipt.bet.status, BetStatus::Lost);
        assert_eq!(receipt.bet.payout, Some(Decimal::ZERO));
        assert_eq!(h.store.balance(user), dec("60"));
        assert_eq!(h.store.user(user).streaks.loss_streak, 1);
    }

    #[tokio::test]
    async fn test_proof_failure_refunds_without_retrying_broadcast() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        let mut inbox = h.notifications.connect(user);
        h.chain.push_proof_failure(FailureKind::Transient);

        let receipt = h.settler.process(head(user, "40")).await.unwrap();

        assert_eq!(receipt.bet.status, BetStatus::Failed);
        assert_eq!(receipt.balance, dec("100"));
        assert_eq!(h.store.balance(user), dec("100"));
        assert!(h.chain.proof_broadcasts().is_empty());

        let kinds: Vec<_> = h.store.ledger_for(user).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                wager_models::LedgerEntryKind::BetStake,
                wager_models::LedgerEntryKind::BetRefund
            ]
        );

        inbox.try_recv().unwrap();
        inbox.try_recv().unwrap();
        assert!(matches!(
            inbox.try_recv().unwrap(),
            Notification::BetFailed { refunded, .. } if refunded == dec("40")
        ));
    }

    #[tokio::test]
    async fn test_settlement_write_failure_after_proof_refunds() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        h.store.fail_next_settles(1);

        let receipt = h.settler.process(head(user, "25")).await.unwrap();

        assert_eq!(receipt.bet.status, BetStatus::Failed);
        assert!(receipt
            .bet
            .failure_reason
            .as_deref()
            .unwrap()
            .starts_with("settlement failed"));
        assert_eq!(h.store.balance(user), dec("100"));
        assert_eq!(h.chain.proof_broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_write_is_retried() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        h.chain.push_proof_failure(FailureKind::Permanent);
        h.store.fail_next_refunds(2);

        let receipt = h.settler.process(head(user, "10")).await.unwrap();

        assert_eq!(receipt.bet.status, BetStatus::Failed);
        assert_eq!(h.store.balance(user), dec("100"));
    }

    #[tokio::test]
    async fn test_unwritable_refund_leaves_bet_for_recovery() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        h.chain.push_proof_failure(FailureKind::Transient);
        h.store.fail_next_refunds(3);

        let err = h.settler.process(head(user, "10")).await.unwrap_err();
        let BetError::RefundPending { bet_id, .. } = err else {
            panic!("expected RefundPending, got {err:?}");
        };
        assert_eq!(h.store.bet(bet_id).status, BetStatus::Pending);
        assert_eq!(h.store.balance(user), dec("90"));

        assert_eq!(h.settler.recover_pending().await, 1);
        let bet = h.store.bet(bet_id);
        assert_eq!(bet.status, BetStatus::Failed);
        assert_eq!(bet.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
        assert_eq!(h.store.balance(user), dec("100"));
    }

    #[tokio::test]
    async fn test_lost_settle_acknowledgement_returns_settled_bet() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        let mut inbox = h.notifications.connect(user);
        h.chain.push_proof("0x00000000000000000000000000000000000000000000000000000000000abc07");
        h.store.commit_then_fail_next_settles(1);

        let receipt = h.settler.process(head(user, "40")).await.unwrap();

        assert_eq!(receipt.bet.status, BetStatus::Lost);
        assert_eq!(receipt.balance, dec("60"));
        assert_eq!(h.store.balance(user), dec("60"));
        assert!(!h
            .store
            .events()
            .iter()
            .any(|e| e.starts_with("refund:")));

        inbox.try_recv().unwrap();
        inbox.try_recv().unwrap();
        assert!(matches!(
            inbox.try_recv().unwrap(),
            Notification::BetSettled { status: BetStatus::Lost, .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_refund_is_recovered_without_restart() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        let store = h.store.clone();
        h.chain.push_proof_failure(FailureKind::Transient);

        let mut join_set = JoinSet::new();
        let queue = BetSettlementQueue::spawn(h.settler, &mut join_set);
        store.fail_next_refunds(3);

        let err = queue.submit(head(user, "10")).await.unwrap_err();
        let BetError::RefundPending { bet_id, .. } = err else {
            panic!("expected RefundPending, got {err:?}");
        };

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.bet(bet_id).status == BetStatus::Pending {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bet recovered by a periodic pass");

        assert_eq!(store.bet(bet_id).status, BetStatus::Failed);
        assert_eq!(store.balance(user), dec("100"));
        join_set.abort_all();
    }

    #[tokio::test]
    async fn test_business_rule_violations_are_rejected_before_proof() {
        let h = harness(MockChain::new(CHAIN));
        let poor = h.store.add_user(dec("30"));
        let banned = h.store.add_user(dec("100"));
        h.store.ban(banned);

        let err = h.settler.process(head(poor, "40")).await.unwrap_err();
        assert!(err.is_business_rule_violation());
        assert!(matches!(
            err,
            BetError::Rejected {
                source: RepositoryError::InsufficientBalance { .. }
            }
        ));

        let err = h.settler.process(head(banned, "10")).await.unwrap_err();
        assert!(matches!(
            err,
            BetError::Rejected {
                source: RepositoryError::AccountDisabled { .. }
            }
        ));

        let err = h.settler.process(head(poor, "0")).await.unwrap_err();
        assert!(err.is_business_rule_violation());

        assert!(h.chain.proof_broadcasts().is_empty());
        assert_eq!(h.store.balance(poor), dec("30"));
    }

    #[tokio::test]
    async fn test_proof_runs_between_opener_wallets() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("5"));

        h.settler.process(head(user, "5")).await.unwrap();

        let proofs = h.chain.proof_broadcasts();
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].from, addr(HARDHAT_ADDRESS_0));
        assert_eq!(proofs[0].to, addr(HARDHAT_ADDRESS_1));
    }

    #[tokio::test]
    async fn test_queue_settles_in_submission_order() {
        let h = harness(MockChain::new(CHAIN).with_proof_delay(Duration::from_millis(20)));
        let first = h.store.add_user(dec("100"));
        let second = h.store.add_user(dec("100"));
        let store = h.store.clone();

        let mut join_set = JoinSet::new();
        let queue = BetSettlementQueue::spawn(h.settler, &mut join_set);

        let (a, b) = tokio::join!(queue.submit(head(first, "10")), queue.submit(head(second, "20")));
        assert!(a.unwrap().bet.status.is_terminal());
        assert!(b.unwrap().bet.status.is_terminal());
        assert_eq!(queue.depth(), 0);

        assert_eq!(
            store.events(),
            vec![
                format!("reserve:{first}"),
                format!("settle:{first}"),
                format!("reserve:{second}"),
                format!("settle:{second}"),
            ]
        );
        join_set.abort_all();
    }

    #[tokio::test]
    async fn test_queue_refunds_interrupted_bets_on_start() {
        let h = harness(MockChain::new(CHAIN));
        let user = h.store.add_user(dec("100"));
        let stale = h.store.insert_pending_bet(user, BetChoice::Tail, dec("30"));
        let store = h.store.clone();

        let mut join_set = JoinSet::new();
        let queue = BetSettlementQueue::spawn(h.settler, &mut join_set);
        let receipt = queue.submit(head(user, "100")).await.unwrap();

        // the new stake could only be covered once the stale one was returned
        assert!(receipt.bet.status.is_terminal());
        assert_eq!(store.bet(stale).status, BetStatus::Failed);
        join_set.abort_all();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_reports_closed_queue() {
        let h = harness(MockChain::new(CHAIN));
        let mut join_set = JoinSet::new();
        let queue = BetSettlementQueue::spawn(h.settler, &mut join_set);
        join_set.shutdown().await;

        let err = queue.submit(head(Uuid::new_v4(), "1")).await.unwrap_err();
        assert!(matches!(err, BetError::QueueClosed));
        assert_eq!(queue.depth(), 0);
    }
}

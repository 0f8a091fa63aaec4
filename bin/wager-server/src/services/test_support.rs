//! In-memory stores and a scripted chain for service tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use wager_chains::{
    canonical_address, ChainOperations, FailureKind, IncomingTransfer, TransferPage,
};
use wager_models::{
    Bet, BetChoice, BetStatus, ChainType, CollectionRetryEntry, DepositAddress, LedgerEntry,
    LedgerEntryKind, LedgerEntryStatus, PlatformWallet, Streaks, User, UserStatus, WalletRole,
    WalletRoles, Withdrawal, WithdrawalStatus,
};

use crate::config::Settings;
use crate::db::{
    BetStore, BetWithBalance, CollectionStore, CollectionTarget, DepositStore, DepositTarget,
    PlatformWalletStore, RepositoryError, RepositoryResult, WithdrawalStore,
};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub const HARDHAT_ADDRESS_0: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const HARDHAT_KEY_0: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const HARDHAT_ADDRESS_1: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const HARDHAT_KEY_1: &str =
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const COLLECTION_ADDRESS: &str = "0x00000000000000000000000000000000000000c0";

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn addr(s: &str) -> Address {
    canonical_address(s).unwrap()
}

pub fn test_settings() -> Settings {
    let wallet_keys = format!(
        "\"{HARDHAT_ADDRESS_0}\" = \"{HARDHAT_KEY_0}\"\n\"{HARDHAT_ADDRESS_1}\" = \"{HARDHAT_KEY_1}\"\n"
    );
    Settings::from_parts(Some(TEST_MNEMONIC.to_string()), None, Some(wallet_keys)).unwrap()
}

pub fn platform_wallet(address: &str, chain: ChainType, roles: WalletRoles) -> PlatformWallet {
    PlatformWallet {
        address: address.to_string(),
        chain,
        roles,
        is_active: true,
    }
}

/// Hardhat #0 funds gas, pays out and opens proofs; #1 receives proofs.
pub fn add_standard_wallets(store: &MemoryStore, chain: ChainType) {
    store.add_wallet(platform_wallet(
        HARDHAT_ADDRESS_0,
        chain,
        WalletRoles {
            gas_reserve: true,
            payout: true,
            proof_opener_a: true,
            ..Default::default()
        },
    ));
    store.add_wallet(platform_wallet(
        HARDHAT_ADDRESS_1,
        chain,
        WalletRoles {
            proof_opener_b: true,
            ..Default::default()
        },
    ));
    store.add_wallet(platform_wallet(
        COLLECTION_ADDRESS,
        chain,
        WalletRoles {
            collection: true,
            ..Default::default()
        },
    ));
}

fn transient_db_error() -> RepositoryError {
    RepositoryError::Database {
        source: sqlx::Error::PoolTimedOut,
    }
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    bets: HashMap<Uuid, Bet>,
    ledger: Vec<LedgerEntry>,
    withdrawals: HashMap<Uuid, Withdrawal>,
    wallets: Vec<PlatformWallet>,
    retry_entries: HashMap<(Uuid, ChainType), CollectionRetryEntry>,
    events: Vec<String>,
    failing_settles: usize,
    failing_refunds: usize,
    /// Settles that commit but report a failure to the caller.
    unacknowledged_settles: usize,
}

impl MemoryState {
    fn user_mut(&mut self, user_id: Uuid) -> RepositoryResult<&mut User> {
        self.users
            .get_mut(&user_id)
            .ok_or(RepositoryError::UserNotFound { user_id })
    }

    fn pending_bet(&self, bet_id: Uuid) -> RepositoryResult<Bet> {
        let bet = self
            .bets
            .get(&bet_id)
            .cloned()
            .ok_or(RepositoryError::BetNotFound { bet_id })?;
        if bet.status != BetStatus::Pending {
            return Err(RepositoryError::BetNotPending {
                bet_id,
                status: bet.status,
            });
        }
        Ok(bet)
    }

    fn append(&mut self, user_id: Uuid, kind: LedgerEntryKind, amount: Decimal) -> &mut LedgerEntry {
        self.ledger.push(LedgerEntry {
            id: Uuid::new_v4(),
            user_id,
            kind,
            chain: None,
            amount,
            tx_hash: None,
            bet_id: None,
            withdrawal_id: None,
            status: LedgerEntryStatus::Completed,
            created_at: Utc::now(),
        });
        let last = self.ledger.len() - 1;
        &mut self.ledger[last]
    }

    fn transition_withdrawal(
        &mut self,
        withdrawal_id: Uuid,
        expected: WithdrawalStatus,
        next: WithdrawalStatus,
    ) -> RepositoryResult<&mut Withdrawal> {
        let withdrawal = self
            .withdrawals
            .get_mut(&withdrawal_id)
            .ok_or(RepositoryError::WithdrawalNotFound { withdrawal_id })?;
        if withdrawal.status != expected {
            return Err(RepositoryError::WithdrawalState {
                withdrawal_id,
                status: withdrawal.status,
                expected,
            });
        }
        withdrawal.status = next;
        withdrawal.updated_at = Utc::now();
        Ok(withdrawal)
    }
}

/// Implements every store trait over one mutex-guarded state.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    wallet_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn add_user(&self, balance: Decimal) -> Uuid {
        let index = self.state.lock().unwrap().users.len() as u32 + 1;
        self.add_user_at(balance, index, Vec::new())
    }

    pub fn add_user_at(
        &self,
        balance: Decimal,
        deposit_path_index: u32,
        addresses: Vec<(ChainType, String)>,
    ) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            balance,
            deposit_path_index,
            deposit_addresses: addresses
                .into_iter()
                .map(|(chain, address)| DepositAddress { chain, address })
                .collect(),
            status: UserStatus::Active,
            streaks: Streaks::default(),
            created_at: Utc::now(),
        };
        let id = user.id;
        self.state.lock().unwrap().users.insert(id, user);
        id
    }

    pub fn ban(&self, user_id: Uuid) {
        self.state.lock().unwrap().users.get_mut(&user_id).unwrap().status = UserStatus::Banned;
    }

    pub fn user(&self, user_id: Uuid) -> User {
        self.state.lock().unwrap().users[&user_id].clone()
    }

    pub fn balance(&self, user_id: Uuid) -> Decimal {
        self.user(user_id).balance
    }

    pub fn bet(&self, bet_id: Uuid) -> Bet {
        self.state.lock().unwrap().bets[&bet_id].clone()
    }

    pub fn ledger_for(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .unwrap()
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn fail_next_settles(&self, count: usize) {
        self.state.lock().unwrap().failing_settles = count;
    }

    pub fn commit_then_fail_next_settles(&self, count: usize) {
        self.state.lock().unwrap().unacknowledged_settles = count;
    }

    pub fn fail_next_refunds(&self, count: usize) {
        self.state.lock().unwrap().failing_refunds = count;
    }

    /// A bet reserved by an earlier process that never reached settlement.
    pub fn insert_pending_bet(&self, user_id: Uuid, choice: BetChoice, amount: Decimal) -> Uuid {
        let mut state = self.state.lock().unwrap();
        let user = state.users.get_mut(&user_id).unwrap();
        user.balance -= amount;
        let bet = Bet {
            id: Uuid::new_v4(),
            user_id,
            choice,
            amount,
            status: BetStatus::Pending,
            payout_multiplier: dec("2"),
            payout: None,
            outcome: None,
            proof_tx_hash: None,
            failure_reason: None,
            created_at: Utc::now(),
            settled_at: None,
        };
        let id = bet.id;
        state.bets.insert(id, bet);
        state.append(user_id, LedgerEntryKind::BetStake, -amount).bet_id = Some(id);
        id
    }

    pub fn add_wallet(&self, wallet: PlatformWallet) {
        self.state.lock().unwrap().wallets.push(wallet);
    }

    pub fn wallet_lookups(&self) -> usize {
        self.wallet_lookups.load(Ordering::SeqCst)
    }

    pub fn retry_entry(&self, user_id: Uuid, chain: ChainType) -> Option<CollectionRetryEntry> {
        self.state
            .lock()
            .unwrap()
            .retry_entries
            .get(&(user_id, chain))
            .cloned()
    }

    pub fn set_retry_entry(&self, entry: CollectionRetryEntry) {
        self.state
            .lock()
            .unwrap()
            .retry_entries
            .insert((entry.user_id, entry.chain), entry);
    }

    /// A pending withdrawal whose amount was already debited.
    pub fn add_withdrawal(
        &self,
        user_id: Uuid,
        chain: ChainType,
        destination_address: &str,
        amount: Decimal,
    ) -> Uuid {
        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            chain,
            destination_address: destination_address.to_string(),
            amount,
            status: WithdrawalStatus::Pending,
            tx_hash: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        let id = withdrawal.id;
        self.state.lock().unwrap().withdrawals.insert(id, withdrawal);
        id
    }

    pub fn withdrawal(&self, withdrawal_id: Uuid) -> Withdrawal {
        self.state.lock().unwrap().withdrawals[&withdrawal_id].clone()
    }

    fn addresses_on(&self, chain: ChainType) -> Vec<(Uuid, u32, String)> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<_> = state
            .users
            .values()
            .filter_map(|u| {
                u.deposit_address(chain)
                    .map(|a| (u.id, u.deposit_path_index, a.to_string()))
            })
            .collect();
        rows.sort_by_key(|(_, index, _)| *index);
        rows
    }
}

#[async_trait]
impl BetStore for MemoryStore {
    async fn reserve_bet(
        &self,
        user_id: Uuid,
        choice: BetChoice,
        amount: Decimal,
        payout_multiplier: Decimal,
    ) -> RepositoryResult<BetWithBalance> {
        if amount <= Decimal::ZERO {
            return Err(RepositoryError::InvalidAmount { amount });
        }
        let mut state = self.state.lock().unwrap();
        let user = state.user_mut(user_id)?;
        if !user.is_active() {
            return Err(RepositoryError::AccountDisabled { user_id });
        }
        if user.balance < amount {
            return Err(RepositoryError::InsufficientBalance {
                available: user.balance,
                requested: amount,
            });
        }
        user.balance -= amount;
        let balance = user.balance;

        let bet = Bet {
            id: Uuid::new_v4(),
            user_id,
            choice,
            amount,
            status: BetStatus::Pending,
            payout_multiplier,
            payout: None,
            outcome: None,
            proof_tx_hash: None,
            failure_reason: None,
            created_at: Utc::now(),
            settled_at: None,
        };
        state.bets.insert(bet.id, bet.clone());
        state.append(user_id, LedgerEntryKind::BetStake, -amount).bet_id = Some(bet.id);
        state.events.push(format!("reserve:{user_id}"));
        Ok(BetWithBalance { bet, balance })
    }

    async fn settle_bet(
        &self,
        bet_id: Uuid,
        outcome: BetChoice,
        proof_tx_hash: &str,
    ) -> RepositoryResult<BetWithBalance> {
        let mut state = self.state.lock().unwrap();
        if state.failing_settles > 0 {
            state.failing_settles -= 1;
            return Err(transient_db_error());
        }
        let bet = state
            .pending_bet(bet_id)?
            .resolve(outcome, proof_tx_hash.to_string(), Utc::now());
        let payout = bet.payout.unwrap_or(Decimal::ZERO);

        let user = state.user_mut(bet.user_id)?;
        if bet.is_won() {
            user.balance += payout;
            user.streaks = user.streaks.after_win();
        } else {
            user.streaks = user.streaks.after_loss();
        }
        let balance = user.balance;

        if bet.is_won() {
            state.append(bet.user_id, LedgerEntryKind::BetPayout, payout).bet_id = Some(bet_id);
        }
        state.bets.insert(bet_id, bet.clone());
        state.events.push(format!("settle:{}", bet.user_id));
        if state.unacknowledged_settles > 0 {
            state.unacknowledged_settles -= 1;
            return Err(transient_db_error());
        }
        Ok(BetWithBalance { bet, balance })
    }

    async fn refund_bet(&self, bet_id: Uuid, reason: &str) -> RepositoryResult<BetWithBalance> {
        let mut state = self.state.lock().unwrap();
        if state.failing_refunds > 0 {
            state.failing_refunds -= 1;
            return Err(transient_db_error());
        }
        let bet = state.pending_bet(bet_id)?.fail(reason, Utc::now());

        let user = state.user_mut(bet.user_id)?;
        user.balance += bet.amount;
        let balance = user.balance;

        state.append(bet.user_id, LedgerEntryKind::BetRefund, bet.amount).bet_id = Some(bet_id);
        state.bets.insert(bet_id, bet.clone());
        state.events.push(format!("refund:{}", bet.user_id));
        Ok(BetWithBalance { bet, balance })
    }

    async fn pending_bets(&self) -> RepositoryResult<Vec<Bet>> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<Bet> = state
            .bets
            .values()
            .filter(|b| b.status == BetStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|b| b.created_at);
        Ok(pending)
    }

    async fn bet_with_balance(&self, bet_id: Uuid) -> RepositoryResult<Option<BetWithBalance>> {
        let state = self.state.lock().unwrap();
        let Some(bet) = state.bets.get(&bet_id).cloned() else {
            return Ok(None);
        };
        let balance = state
            .users
            .get(&bet.user_id)
            .map(|u| u.balance)
            .ok_or(RepositoryError::UserNotFound {
                user_id: bet.user_id,
            })?;
        Ok(Some(BetWithBalance { bet, balance }))
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn deposit_targets(&self, chain: ChainType) -> RepositoryResult<Vec<DepositTarget>> {
        Ok(self
            .addresses_on(chain)
            .into_iter()
            .map(|(user_id, _, address)| DepositTarget { user_id, address })
            .collect())
    }

    async fn deposit_exists(&self, chain: ChainType, tx_hash: &str) -> RepositoryResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ledger
            .iter()
            .any(|e| e.chain == Some(chain) && e.tx_hash.as_deref() == Some(tx_hash)))
    }

    async fn credit_deposit(
        &self,
        user_id: Uuid,
        chain: ChainType,
        tx_hash: &str,
        amount: Decimal,
    ) -> RepositoryResult<Option<Decimal>> {
        let mut state = self.state.lock().unwrap();
        if state
            .ledger
            .iter()
            .any(|e| e.chain == Some(chain) && e.tx_hash.as_deref() == Some(tx_hash))
        {
            return Ok(None);
        }
        let user = state.user_mut(user_id)?;
        user.balance += amount;
        let balance = user.balance;

        let entry = state.append(user_id, LedgerEntryKind::Deposit, amount);
        entry.chain = Some(chain);
        entry.tx_hash = Some(tx_hash.to_string());
        Ok(Some(balance))
    }
}

#[async_trait]
impl PlatformWalletStore for MemoryStore {
    async fn active_wallet(
        &self,
        chain: ChainType,
        role: WalletRole,
    ) -> RepositoryResult<Option<PlatformWallet>> {
        self.wallet_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .wallets
            .iter()
            .find(|w| w.chain == chain && w.is_active && w.roles.has(role))
            .cloned())
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn collection_targets(&self, chain: ChainType) -> RepositoryResult<Vec<CollectionTarget>> {
        Ok(self
            .addresses_on(chain)
            .into_iter()
            .map(|(user_id, deposit_path_index, address)| CollectionTarget {
                user_id,
                deposit_path_index,
                address,
            })
            .collect())
    }

    async fn retry_entries(&self, chain: ChainType) -> RepositoryResult<Vec<CollectionRetryEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .retry_entries
            .values()
            .filter(|e| e.chain == chain)
            .cloned()
            .collect())
    }

    async fn save_retry_entry(&self, entry: &CollectionRetryEntry) -> RepositoryResult<()> {
        self.set_retry_entry(entry.clone());
        Ok(())
    }

    async fn clear_retry_entry(&self, user_id: Uuid, chain: ChainType) -> RepositoryResult<()> {
        self.state
            .lock()
            .unwrap()
            .retry_entries
            .remove(&(user_id, chain));
        Ok(())
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn pending_withdrawals(&self) -> RepositoryResult<Vec<Withdrawal>> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<Withdrawal> = state
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|w| w.created_at);
        Ok(pending)
    }

    async fn claim_withdrawal(&self, withdrawal_id: Uuid) -> RepositoryResult<Withdrawal> {
        let mut state = self.state.lock().unwrap();
        state
            .transition_withdrawal(
                withdrawal_id,
                WithdrawalStatus::Pending,
                WithdrawalStatus::Processing,
            )
            .map(|w| w.clone())
    }

    async fn complete_withdrawal(
        &self,
        withdrawal_id: Uuid,
        tx_hash: &str,
    ) -> RepositoryResult<Withdrawal> {
        let mut state = self.state.lock().unwrap();
        let withdrawal = state.transition_withdrawal(
            withdrawal_id,
            WithdrawalStatus::Processing,
            WithdrawalStatus::Completed,
        )?;
        withdrawal.tx_hash = Some(tx_hash.to_string());
        Ok(withdrawal.clone())
    }

    async fn flag_for_manual_review(
        &self,
        withdrawal_id: Uuid,
        reason: &str,
        tx_hash: Option<&str>,
    ) -> RepositoryResult<Withdrawal> {
        let mut state = self.state.lock().unwrap();
        let withdrawal = state.transition_withdrawal(
            withdrawal_id,
            WithdrawalStatus::Processing,
            WithdrawalStatus::ManualReview,
        )?;
        withdrawal.failure_reason = Some(reason.to_string());
        if let Some(tx_hash) = tx_hash {
            withdrawal.tx_hash = Some(tx_hash.to_string());
        }
        Ok(withdrawal.clone())
    }
}

fn scripted_error(kind: FailureKind, chain: ChainType, address: Address) -> wager_chains::Error {
    match kind {
        FailureKind::Transient => wager_chains::Error::Timeout {
            operation: "scripted rpc call",
            timeout: Duration::from_secs(1),
        },
        FailureKind::Permanent => wager_chains::Error::InvalidAddress {
            address: format!("{address:#x}"),
            network: chain,
            reason: "scripted".to_string(),
        },
    }
}

fn unconfirmed(tx_hash: String) -> wager_chains::Error {
    wager_chains::Error::Unconfirmed {
        tx_hash,
        source: alloy::providers::PendingTransactionError::FailedToRegister,
        loc: snafu::location!(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

#[derive(Default)]
struct ChainState {
    native: HashMap<Address, U256>,
    token: HashMap<Address, U256>,
    proofs: VecDeque<Result<String, FailureKind>>,
    /// Remaining scripted failures for any call touching the address.
    failures: HashMap<Address, (FailureKind, usize)>,
    /// Transfers to the address that land but report no receipt.
    unconfirmed: HashMap<Address, usize>,
    incoming: Vec<IncomingTransfer>,
    indexer_down: HashSet<Address>,
    native_transfers: Vec<RecordedTransfer>,
    token_transfers: Vec<RecordedTransfer>,
    proof_broadcasts: Vec<RecordedTransfer>,
    nonce: u64,
}

impl ChainState {
    fn check(&mut self, chain: ChainType, address: Address) -> wager_chains::Result<()> {
        if let Some((kind, remaining)) = self.failures.get_mut(&address) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(scripted_error(*kind, chain, address));
            }
        }
        Ok(())
    }

    /// Consumes one scripted missing receipt for a transfer to `to`.
    fn receipt_lost(&mut self, to: Address) -> bool {
        match self.unconfirmed.get_mut(&to) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn next_hash(&mut self) -> String {
        self.nonce += 1;
        format!("0x{:064x}", self.nonce)
    }
}

/// Scripted `ChainOperations`: balances live in maps and transfers move them.
pub struct MockChain {
    chain: ChainType,
    token_address: Address,
    page_size: usize,
    proof_delay: Duration,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(chain: ChainType) -> Self {
        Self {
            chain,
            token_address: Address::repeat_byte(0x70),
            page_size: 50,
            proof_delay: Duration::ZERO,
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_proof_delay(mut self, delay: Duration) -> Self {
        self.proof_delay = delay;
        self
    }

    pub fn set_native(&self, address: Address, amount: U256) {
        self.state.lock().unwrap().native.insert(address, amount);
    }

    pub fn set_token(&self, address: Address, amount: U256) {
        self.state.lock().unwrap().token.insert(address, amount);
    }

    pub fn native(&self, address: Address) -> U256 {
        self.state.lock().unwrap().native.get(&address).copied().unwrap_or_default()
    }

    pub fn token(&self, address: Address) -> U256 {
        self.state.lock().unwrap().token.get(&address).copied().unwrap_or_default()
    }

    pub fn push_proof(&self, tx_hash: &str) {
        self.state
            .lock()
            .unwrap()
            .proofs
            .push_back(Ok(tx_hash.to_string()));
    }

    pub fn push_proof_failure(&self, kind: FailureKind) {
        self.state.lock().unwrap().proofs.push_back(Err(kind));
    }

    pub fn fail_address(&self, address: Address, kind: FailureKind, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(address, (kind, times));
    }

    pub fn lose_receipts_to(&self, address: Address, times: usize) {
        self.state
            .lock()
            .unwrap()
            .unconfirmed
            .insert(address, times);
    }

    pub fn add_incoming(&self, to: Address, tx_hash: &str, amount: U256, at: DateTime<Utc>) {
        self.state.lock().unwrap().incoming.push(IncomingTransfer {
            tx_hash: tx_hash.to_string(),
            from: Address::repeat_byte(0x01),
            to,
            amount,
            block_timestamp: at,
        });
    }

    pub fn indexer_down_for(&self, address: Address) {
        self.state.lock().unwrap().indexer_down.insert(address);
    }

    pub fn native_transfers(&self) -> Vec<RecordedTransfer> {
        self.state.lock().unwrap().native_transfers.clone()
    }

    pub fn token_transfers(&self) -> Vec<RecordedTransfer> {
        self.state.lock().unwrap().token_transfers.clone()
    }

    pub fn proof_broadcasts(&self) -> Vec<RecordedTransfer> {
        self.state.lock().unwrap().proof_broadcasts.clone()
    }
}

#[async_trait]
impl ChainOperations for MockChain {
    fn chain_type(&self) -> ChainType {
        self.chain
    }

    fn token_decimals(&self) -> u8 {
        6
    }

    fn token_address(&self) -> Address {
        self.token_address
    }

    async fn native_balance(&self, address: Address) -> wager_chains::Result<U256> {
        let mut state = self.state.lock().unwrap();
        state.check(self.chain, address)?;
        Ok(state.native.get(&address).copied().unwrap_or_default())
    }

    async fn token_balance(&self, address: Address) -> wager_chains::Result<U256> {
        let mut state = self.state.lock().unwrap();
        state.check(self.chain, address)?;
        Ok(state.token.get(&address).copied().unwrap_or_default())
    }

    async fn transfer_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> wager_chains::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.check(self.chain, to)?;
        *state.native.entry(to).or_default() += amount;
        state.native_transfers.push(RecordedTransfer {
            from: signer.address(),
            to,
            amount,
        });
        let tx_hash = state.next_hash();
        if state.receipt_lost(to) {
            return Err(unconfirmed(tx_hash));
        }
        Ok(tx_hash)
    }

    async fn transfer_token(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> wager_chains::Result<String> {
        let from = signer.address();
        let mut state = self.state.lock().unwrap();
        state.check(self.chain, from)?;
        state.check(self.chain, to)?;

        let available = state.token.get(&from).copied().unwrap_or_default();
        if available < amount {
            let tx_hash = state.next_hash();
            return Err(wager_chains::Error::TransactionReverted { tx_hash });
        }
        state.token.insert(from, available - amount);
        *state.token.entry(to).or_default() += amount;
        state.token_transfers.push(RecordedTransfer { from, to, amount });
        let tx_hash = state.next_hash();
        if state.receipt_lost(to) {
            return Err(unconfirmed(tx_hash));
        }
        Ok(tx_hash)
    }

    async fn broadcast_proof(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
    ) -> wager_chains::Result<String> {
        if !self.proof_delay.is_zero() {
            tokio::time::sleep(self.proof_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        let scripted = state.proofs.pop_front();
        let tx_hash = match scripted {
            Some(Ok(tx_hash)) => tx_hash,
            Some(Err(kind)) => return Err(scripted_error(kind, self.chain, to)),
            None => state.next_hash(),
        };
        state.proof_broadcasts.push(RecordedTransfer {
            from: signer.address(),
            to,
            amount: U256::ZERO,
        });
        Ok(tx_hash)
    }

    async fn incoming_transfers(
        &self,
        address: Address,
        since: DateTime<Utc>,
        page: u32,
    ) -> wager_chains::Result<TransferPage> {
        let state = self.state.lock().unwrap();
        if state.indexer_down.contains(&address) {
            return Err(scripted_error(FailureKind::Transient, self.chain, address));
        }
        let mut matching: Vec<IncomingTransfer> = state
            .incoming
            .iter()
            .filter(|t| t.to == address && t.block_timestamp >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.block_timestamp);

        let start = (page.max(1) as usize - 1) * self.page_size;
        let transfers: Vec<_> = matching.iter().skip(start).take(self.page_size).cloned().collect();
        Ok(TransferPage {
            has_more: matching.len() > start + transfers.len(),
            transfers,
        })
    }
}

pub mod bet_queue;
pub mod deposit_listener;
pub mod fund_collector;
pub mod keyring;
pub mod payout;
pub mod registration;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_support;

pub use bet_queue::{BetError, BetQueueConfig, BetReceipt, BetRequest, BetSettlementQueue, BetSettler};
pub use deposit_listener::{DepositListener, DepositListenerConfig, DepositRoundReport};
pub use fund_collector::{FundCollector, FundCollectorConfig, SweepReport};
pub use keyring::{KeyringError, PlatformKeyring};
pub use payout::{PayoutError, PayoutExecutor, WithdrawalError, WithdrawalProcessor};
pub use registration::{RegistrationError, RegistrationService};
pub use retry::{retry_with_backoff, RetryPolicy};

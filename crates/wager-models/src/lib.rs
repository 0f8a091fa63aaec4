mod amount;
mod bet;
mod chain;
mod collection;
mod ledger;
mod notification;
mod status;
mod user;
mod wallet;
mod withdrawal;

pub use amount::*;
pub use bet::*;
pub use chain::*;
pub use collection::*;
pub use ledger::*;
pub use notification::*;
pub use status::*;
pub use user::*;
pub use wallet::*;
pub use withdrawal::*;

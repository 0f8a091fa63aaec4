pub mod error;
pub mod evm;
pub mod key_derivation;
pub mod registry;
pub mod traits;

pub use error::{Error, FailureKind, Result};
pub use evm::{EvmChain, EvmChainConfig};
pub use key_derivation::{next_deposit_index, DerivedWallet, KeyDerivationService};
pub use registry::ChainRegistry;
pub use traits::{canonical_address, ChainOperations, IncomingTransfer, TransferPage};

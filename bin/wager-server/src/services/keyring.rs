use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use dashmap::DashMap;
use secrecy::ExposeSecret;
use snafu::prelude::*;
use tokio::sync::OnceCell;
use tracing::info;
use wager_chains::canonical_address;
use wager_models::{ChainType, WalletRole};

use crate::config::Settings;
use crate::db::{PlatformWalletStore, RepositoryError};

#[derive(Debug, Snafu)]
pub enum KeyringError {
    #[snafu(display("Failed to look up platform wallet: {source}"))]
    WalletLookup { source: RepositoryError },

    #[snafu(display("No active {role:?} wallet configured for {chain}"))]
    NoActiveWallet { chain: ChainType, role: WalletRole },

    #[snafu(display("Platform wallet address {address} is not a valid address"))]
    InvalidWalletAddress { address: String },

    #[snafu(display("No private key supplied for platform wallet {address}"))]
    MissingKey { address: Address },

    #[snafu(display("Private key for platform wallet {address} could not be parsed"))]
    InvalidKey { address: Address },

    #[snafu(display("Key supplied for {expected} belongs to {actual}"))]
    KeyMismatch { expected: Address, actual: Address },
}

pub type KeyringResult<T, E = KeyringError> = std::result::Result<T, E>;

/// Resolves signers for platform wallets (gas reserve, payout, proof opener).
///
/// Keys are supplied out of band through the settings keyring, never derived.
/// Each (chain, role) signer is loaded once per process; concurrent first
/// callers wait on the same in-flight load.
pub struct PlatformKeyring {
    settings: Arc<Settings>,
    wallets: Arc<dyn PlatformWalletStore>,
    signers: DashMap<(ChainType, WalletRole), Arc<OnceCell<PrivateKeySigner>>>,
}

impl PlatformKeyring {
    pub fn new(settings: Arc<Settings>, wallets: Arc<dyn PlatformWalletStore>) -> Self {
        Self {
            settings,
            wallets,
            signers: DashMap::new(),
        }
    }

    /// Address of the active wallet for a role. Not cached.
    pub async fn wallet_address(&self, chain: ChainType, role: WalletRole) -> KeyringResult<Address> {
        let wallet = self
            .wallets
            .active_wallet(chain, role)
            .await
            .context(WalletLookupSnafu)?
            .context(NoActiveWalletSnafu { chain, role })?;

        canonical_address(&wallet.address).context(InvalidWalletAddressSnafu {
            address: wallet.address,
        })
    }

    pub async fn signer(&self, chain: ChainType, role: WalletRole) -> KeyringResult<PrivateKeySigner> {
        // clone the cell out so no map shard lock is held across the await
        let cell = self
            .signers
            .entry((chain, role))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| self.load_signer(chain, role))
            .await
            .cloned()
    }

    async fn load_signer(&self, chain: ChainType, role: WalletRole) -> KeyringResult<PrivateKeySigner> {
        let address = self.wallet_address(chain, role).await?;
        let key = self
            .settings
            .wallet_key(&address)
            .context(MissingKeySnafu { address })?;

        let signer = PrivateKeySigner::from_str(key.expose_secret())
            .map_err(|_| KeyringError::InvalidKey { address })?;

        ensure!(
            signer.address() == address,
            KeyMismatchSnafu {
                expected: address,
                actual: signer.address(),
            }
        );

        info!(%chain, ?role, %address, "Loaded platform wallet signer");
        Ok(signer)
    }
}

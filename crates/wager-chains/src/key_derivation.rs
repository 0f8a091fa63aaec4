//! Hierarchical-deterministic key derivation for user deposit addresses.
//!
//! Every deposit key is a BIP-32 child of one BIP-39 seed, so no private key
//! is ever stored: the sweeper recomputes the key for an index when it needs
//! to sign. Each chain has its own coin-type namespace.

use std::fmt;

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use bip39::{Language, Mnemonic};
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Network;
use secrecy::{ExposeSecret, SecretBox, SecretString};
use tracing::debug;
use wager_models::ChainType;
use zeroize::Zeroize;

use crate::{Error, Result};

/// Highest non-hardened BIP-32 child index.
pub const MAX_DERIVATION_INDEX: u32 = (1 << 31) - 1;

struct MasterSeed([u8; 64]);

impl Zeroize for MasterSeed {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// A derived key pair. The private key is hex encoded with a `0x` prefix.
#[derive(Debug)]
pub struct DerivedWallet {
    pub chain: ChainType,
    pub index: u32,
    pub address: Address,
    pub private_key: SecretString,
}

pub struct KeyDerivationService {
    seed: SecretBox<MasterSeed>,
    secp: Secp256k1<All>,
}

impl fmt::Debug for KeyDerivationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDerivationService")
            .field("seed", &"[REDACTED]")
            .finish()
    }
}

/// SLIP-44 coin type used as the hardened namespace for each chain.
pub fn coin_type(chain: ChainType) -> u32 {
    match chain {
        ChainType::Ethereum => 60,
        ChainType::Base => 8453,
    }
}

/// `m/44'/{coin}'/0'/0/{index}`
pub fn derivation_path(chain: ChainType, index: u32) -> Result<DerivationPath> {
    let hardened = |i: u32| {
        ChildNumber::from_hardened_idx(i).map_err(|e| Error::KeyDerivation {
            message: e.to_string(),
        })
    };
    let leaf = ChildNumber::from_normal_idx(index).map_err(|_| Error::InvalidIndex { index })?;

    Ok(DerivationPath::from(vec![
        hardened(44)?,
        hardened(coin_type(chain))?,
        hardened(0)?,
        ChildNumber::from_normal_idx(0).map_err(|e| Error::KeyDerivation {
            message: e.to_string(),
        })?,
        leaf,
    ]))
}

/// Next deposit index to hand out: `max(current, floor) + 1`, where `current`
/// is the highest index already assigned (`None` when no user exists yet).
pub fn next_deposit_index(current: Option<u32>, floor: u32) -> Result<u32> {
    let base = current.unwrap_or(floor).max(floor);
    match base.checked_add(1) {
        Some(next) if next <= MAX_DERIVATION_INDEX => Ok(next),
        _ => Err(Error::InvalidIndex {
            index: base.saturating_add(1),
        }),
    }
}

impl KeyDerivationService {
    pub fn from_mnemonic(phrase: &str, passphrase: Option<&str>) -> Result<Self> {
        let mnemonic =
            Mnemonic::parse_in(Language::English, phrase.trim()).map_err(|e| {
                Error::InvalidMnemonic {
                    reason: e.to_string(),
                }
            })?;
        let mut seed = mnemonic.to_seed(passphrase.unwrap_or(""));
        let service = Self::from_seed(&seed);
        seed.zeroize();
        Ok(service)
    }

    pub fn from_seed(seed: &[u8; 64]) -> Self {
        Self {
            seed: SecretBox::new(Box::new(MasterSeed(*seed))),
            secp: Secp256k1::new(),
        }
    }

    fn derive_secret(&self, chain: ChainType, index: u32) -> Result<[u8; 32]> {
        let path = derivation_path(chain, index)?;
        // the network only affects xpriv serialization, never the derived key
        let master = Xpriv::new_master(Network::Bitcoin, &self.seed.expose_secret().0)
            .map_err(|e| Error::KeyDerivation {
                message: e.to_string(),
            })?;
        let child = master
            .derive_priv(&self.secp, &path)
            .map_err(|e| Error::KeyDerivation {
                message: e.to_string(),
            })?;
        Ok(child.private_key.secret_bytes())
    }

    pub fn derive_signer(&self, chain: ChainType, index: u32) -> Result<PrivateKeySigner> {
        let mut secret = self.derive_secret(chain, index)?;
        let signer = PrivateKeySigner::from_bytes(&B256::from(secret)).map_err(|e| {
            Error::KeyDerivation {
                message: e.to_string(),
            }
        });
        secret.zeroize();
        signer
    }

    pub fn derive_address(&self, chain: ChainType, index: u32) -> Result<Address> {
        let address = self.derive_signer(chain, index)?.address();
        debug!(%chain, index, %address, "Derived deposit address");
        Ok(address)
    }

    pub fn derive_wallet(&self, chain: ChainType, index: u32) -> Result<DerivedWallet> {
        let signer = self.derive_signer(chain, index)?;
        let private_key = SecretString::from(format!(
            "0x{}",
            alloy::hex::encode(signer.to_bytes())
        ));
        Ok(DerivedWallet {
            chain,
            index,
            address: signer.address(),
            private_key,
        })
    }

    /// Addresses for `index` on every supported chain.
    pub fn derive_all_addresses(&self, index: u32) -> Result<Vec<(ChainType, Address)>> {
        ChainType::ALL
            .iter()
            .map(|chain| Ok((*chain, self.derive_address(*chain, index)?)))
            .collect()
    }
}

use alloy::primitives::Address;
use secrecy::SecretString;
use snafu::{ResultExt, Snafu};
use std::{collections::HashMap, fmt, fs, path::Path, sync::Arc};
use tracing::info;
use wager_chains::{canonical_address, KeyDerivationService};
use zeroize::Zeroize;

pub const MASTER_SEED_FILE: &str = "master-seed.txt";
pub const MASTER_SEED_PASSPHRASE_FILE: &str = "master-seed-passphrase.txt";
pub const WALLET_KEYS_FILE: &str = "wallet-keys.toml";
pub const MASTER_SEED_ENV: &str = "MASTER_SEED_MNEMONIC";

#[derive(Debug, Snafu)]
pub enum SettingsError {
    #[snafu(display("Failed to read {path}: {source}"))]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display(
        "No master seed found: create {MASTER_SEED_FILE} in the config dir or set {MASTER_SEED_ENV}"
    ))]
    MissingMasterSeed,

    #[snafu(display("Master seed is not a valid BIP-39 mnemonic: {source}"))]
    InvalidMasterSeed { source: wager_chains::Error },

    #[snafu(display("Failed to parse {WALLET_KEYS_FILE}: {source}"))]
    WalletKeysParse { source: toml::de::Error },

    #[snafu(display("Invalid wallet address in {WALLET_KEYS_FILE}: {address}"))]
    InvalidWalletAddress { address: String },
}

type Result<T> = std::result::Result<T, SettingsError>;

/// Secrets loaded from the config directory at startup.
pub struct Settings {
    key_derivation: Arc<KeyDerivationService>,
    wallet_keys: HashMap<Address, SecretString>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("key_derivation", &self.key_derivation)
            .field("wallet_keys", &self.wallet_keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .context(LoadSnafu {
            path: path.display().to_string(),
        })
}

impl Settings {
    /// Load secrets from `config_dir`. A missing or invalid master seed is
    /// fatal: deriving addresses from the wrong seed would strand deposits.
    pub fn load(config_dir: &str) -> Result<Self> {
        let dir = Path::new(config_dir);

        let mnemonic = match read_optional(&dir.join(MASTER_SEED_FILE))? {
            Some(mnemonic) => Some(mnemonic),
            None => std::env::var(MASTER_SEED_ENV).ok(),
        };
        let passphrase = read_optional(&dir.join(MASTER_SEED_PASSPHRASE_FILE))?;
        let wallet_keys = read_optional(&dir.join(WALLET_KEYS_FILE))?;

        Self::from_parts(mnemonic, passphrase, wallet_keys)
    }

    pub fn from_parts(
        mnemonic: Option<String>,
        passphrase: Option<String>,
        wallet_keys_toml: Option<String>,
    ) -> Result<Self> {
        let mut mnemonic = mnemonic
            .filter(|m| !m.trim().is_empty())
            .ok_or(SettingsError::MissingMasterSeed)?;
        let mut passphrase = passphrase.map(|p| p.trim_end_matches(['\r', '\n']).to_string());

        let key_derivation =
            KeyDerivationService::from_mnemonic(&mnemonic, passphrase.as_deref())
                .context(InvalidMasterSeedSnafu);
        mnemonic.zeroize();
        passphrase.zeroize();
        let key_derivation = Arc::new(key_derivation?);

        let wallet_keys = match wallet_keys_toml {
            Some(raw) => parse_wallet_keys(raw)?,
            None => HashMap::new(),
        };

        info!(
            platform_wallet_keys = wallet_keys.len(),
            "Loaded settings"
        );

        Ok(Self {
            key_derivation,
            wallet_keys,
        })
    }

    #[must_use]
    pub fn key_derivation(&self) -> Arc<KeyDerivationService> {
        self.key_derivation.clone()
    }

    /// Operator-supplied private key for a platform wallet.
    pub fn wallet_key(&self, address: &Address) -> Option<&SecretString> {
        self.wallet_keys.get(address)
    }
}

fn parse_wallet_keys(mut raw: String) -> Result<HashMap<Address, SecretString>> {
    let parsed: std::result::Result<HashMap<String, String>, _> = toml::from_str(&raw);
    raw.zeroize();

    let mut keys = HashMap::new();
    for (address, key) in parsed.context(WalletKeysParseSnafu)? {
        let parsed_address =
            canonical_address(&address).ok_or(SettingsError::InvalidWalletAddress {
                address: address.clone(),
            })?;
        keys.insert(parsed_address, SecretString::from(key));
    }
    Ok(keys)
}

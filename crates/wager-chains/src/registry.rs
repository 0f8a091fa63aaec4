use crate::{ChainOperations, Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use wager_models::ChainType;

/// Chains the process was configured with, keyed by chain type.
#[derive(Default)]
pub struct ChainRegistry {
    chains: BTreeMap<ChainType, Arc<dyn ChainOperations>>,
}

impl ChainRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain implementation, replacing any previous one for the same chain type
    pub fn register(&mut self, chain_type: ChainType, chain: Arc<dyn ChainOperations>) {
        self.chains.insert(chain_type, chain);
    }

    pub fn get(&self, chain_type: ChainType) -> Option<Arc<dyn ChainOperations>> {
        self.chains.get(&chain_type).cloned()
    }

    /// Like [`ChainRegistry::get`], but a missing chain is an error.
    pub fn require(&self, chain_type: ChainType) -> Result<Arc<dyn ChainOperations>> {
        self.get(chain_type).ok_or_else(|| Error::ChainNotSupported {
            chain: chain_type.to_string(),
        })
    }

    /// Registered chain types in a stable order
    #[must_use]
    pub fn registered_chains(&self) -> Vec<ChainType> {
        self.chains.keys().copied().collect()
    }
}

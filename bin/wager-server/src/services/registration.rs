use std::sync::Arc;

use snafu::prelude::*;
use tracing::info;
use wager_chains::KeyDerivationService;
use wager_models::User;

use crate::db::{RepositoryError, UserRepository};

#[derive(Debug, Snafu)]
pub enum RegistrationError {
    #[snafu(display("Failed to register user: {source}"))]
    Register { source: RepositoryError },
}

/// Allocates a fresh deposit index for each new user and derives their
/// per-chain deposit addresses from it.
#[derive(Clone)]
pub struct RegistrationService {
    users: UserRepository,
    key_derivation: Arc<KeyDerivationService>,
    reserved_index_floor: u32,
}

impl RegistrationService {
    pub fn new(
        users: UserRepository,
        key_derivation: Arc<KeyDerivationService>,
        reserved_index_floor: u32,
    ) -> Self {
        Self {
            users,
            key_derivation,
            reserved_index_floor,
        }
    }

    pub async fn register(&self) -> Result<User, RegistrationError> {
        let key_derivation = self.key_derivation.clone();
        let user = self
            .users
            .register(self.reserved_index_floor, move |index| {
                key_derivation.derive_all_addresses(index)
            })
            .await
            .context(RegisterSnafu)?;

        metrics::counter!("wager_users_registered_total").increment(1);
        info!(
            user_id = %user.id,
            deposit_path_index = user.deposit_path_index,
            "New user deposit addresses allocated"
        );
        Ok(user)
    }
}

use std::sync::Arc;

use blockchain_utils::init_logger;
use ctor::ctor;
use rust_decimal::Decimal;
use sqlx::{
    pool::PoolOptions,
    postgres::{PgConnectOptions, Postgres},
};
use uuid::Uuid;
use wager_chains::KeyDerivationService;
use wager_models::{ChainType, User};
use wager_server::{
    db::{Database, DepositStore},
    services::RegistrationService,
};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("decimal literal should parse")
}

/// Connects to the per-test database provisioned by `sqlx::test` and runs migrations.
pub async fn connect(
    pool_options: PoolOptions<Postgres>,
    connect_options: PgConnectOptions,
) -> Database {
    let pool = pool_options
        .max_connections(16)
        .connect_with(connect_options)
        .await
        .expect("Should connect to test database");
    Database::from_pool(pool)
        .await
        .expect("Migrations should apply")
}

pub fn key_derivation() -> Arc<KeyDerivationService> {
    Arc::new(
        KeyDerivationService::from_mnemonic(TEST_MNEMONIC, None)
            .expect("Test mnemonic should be valid"),
    )
}

pub fn registration(db: &Database, reserved_index_floor: u32) -> RegistrationService {
    RegistrationService::new(db.users(), key_derivation(), reserved_index_floor)
}

/// Registers a user and credits `balance` through a synthetic deposit.
pub async fn funded_user(db: &Database, balance: &str) -> User {
    let user = registration(db, 0)
        .register()
        .await
        .expect("Registration should succeed");
    db.ledger()
        .credit_deposit(
            user.id,
            ChainType::Ethereum,
            &format!("0xfund{}", Uuid::new_v4().simple()),
            dec(balance),
        )
        .await
        .expect("Funding deposit should apply")
        .expect("Funding deposit should be new");
    user
}

pub async fn balance_of(db: &Database, user_id: Uuid) -> Decimal {
    db.users()
        .get(user_id)
        .await
        .expect("User lookup should succeed")
        .expect("User should exist")
        .balance
}

/// Asserts the stored balance equals the sum of the user's ledger rows.
pub async fn assert_ledger_conserved(db: &Database, user_id: Uuid) {
    let balance = balance_of(db, user_id).await;
    let ledger = db
        .ledger()
        .ledger_balance(user_id)
        .await
        .expect("Ledger sum should load");
    assert_eq!(balance, ledger, "balance diverged from ledger for {user_id}");
}

#[ctor]
fn init_test_tracing() {
    let has_nocapture = std::env::args().any(|arg| arg == "--nocapture" || arg == "--show-output");
    if has_nocapture {
        init_logger("info,wager_server=debug,wager_chains=debug")
            .expect("Logger should initialize");
    }
}

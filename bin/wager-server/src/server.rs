use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use alloy::primitives::U256;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use blockchain_utils::{handle_background_thread_result, shutdown_signal};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use rust_decimal::Decimal;
use snafu::prelude::*;
use tokio::{net::TcpListener, task::JoinSet, time::Duration};
use tracing::{error, info};
use wager_chains::{ChainOperations, ChainRegistry, EvmChain, EvmChainConfig};
use wager_models::{decimal_to_token_units, ChainType};

use crate::{
    config::Settings,
    db::Database,
    notifications::NotificationHub,
    services::{
        bet_queue::{BETS_TOTAL_METRIC, BET_QUEUE_DEPTH_METRIC, BET_SETTLEMENT_DURATION_METRIC},
        deposit_listener::{
            spawn_deposit_listener, DEPOSITS_CREDITED_METRIC, DEPOSIT_SCAN_FAILURES_METRIC,
        },
        fund_collector::{spawn_fund_collector, SWEEP_ADDRESSES_METRIC, SWEEP_COLLECTED_METRIC},
        payout::{spawn_withdrawal_processor, WITHDRAWALS_TOTAL_METRIC},
        BetQueueConfig, BetSettlementQueue, BetSettler, DepositListener, DepositListenerConfig,
        FundCollector, FundCollectorConfig, PayoutExecutor, PlatformKeyring, RegistrationService,
        RetryPolicy, WithdrawalProcessor,
    },
    ChainInitSnafu, DatabaseInitSnafu, Error, MetricsRecorderSnafu, MetricsServerBindSnafu,
    MetricsServerSnafu, Result, SettingsSnafu, WagerServerArgs,
};

/// Native asset decimals on every supported chain.
const NATIVE_DECIMALS: u8 = 18;

static PROMETHEUS_HANDLE: OnceLock<Arc<PrometheusHandle>> = OnceLock::new();

/// Entry points handed to the request layer.
pub struct WagerServices {
    pub db: Database,
    pub notifications: Arc<NotificationHub>,
    pub registration: RegistrationService,
    pub bets: BetSettlementQueue,
    pub withdrawals: Arc<WithdrawalProcessor>,
}

pub async fn run_server(args: WagerServerArgs) -> Result<()> {
    info!("Starting wager server...");

    // a missing or bad master seed stops the process before anything is spawned
    let settings = Arc::new(Settings::load(&args.config_dir).context(SettingsSnafu)?);

    let db = Database::connect(
        &args.database_url,
        args.db_max_connections,
        args.db_min_connections,
    )
    .await
    .context(DatabaseInitSnafu)?;

    info!("Initializing chain registry...");
    let chains = Arc::new(build_chain_registry(&args)?);

    let mut join_set: JoinSet<Result<()>> = JoinSet::new();

    if let Some(metrics_addr) = args.metrics_listen_addr {
        setup_metrics(&mut join_set, metrics_addr)?;
    } else {
        install_metrics_recorder()?;
    }

    let services = start_services(&args, settings, db, chains, &mut join_set)?;
    info!(
        connected_users = services.notifications.connected_count(),
        "Wager server running"
    );

    let result = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
        task_end = join_set.join_next() => {
            match handle_background_thread_result(task_end) {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!("Background task exited: {}", e);
                    Err(Error::BackgroundTask { message: e.to_string() })
                }
            }
        }
    };

    drop(services);
    join_set.abort_all();
    while join_set.join_next().await.is_some() {}
    info!("All background tasks have been shut down");

    result
}

fn build_chain_registry(args: &WagerServerArgs) -> Result<ChainRegistry> {
    let mut registry = ChainRegistry::new();

    let ethereum = EvmChain::new(EvmChainConfig {
        chain_type: ChainType::Ethereum,
        rpc_url: args.ethereum_rpc_url.clone(),
        indexer_url: args.ethereum_token_indexer_url.clone(),
        token_address: args.ethereum_token_address,
        token_decimals: args.ethereum_token_decimals,
        rpc_timeout: Duration::from_secs(args.rpc_timeout_seconds),
        confirmation_timeout: Duration::from_secs(args.confirmation_timeout_seconds),
        indexer_page_limit: args.indexer_page_limit,
    })
    .context(ChainInitSnafu {
        chain: ChainType::Ethereum,
    })?;
    registry.register(ChainType::Ethereum, Arc::new(ethereum));

    match (
        &args.base_rpc_url,
        &args.base_token_indexer_url,
        args.base_token_address,
    ) {
        (Some(rpc_url), Some(indexer_url), Some(token_address)) => {
            let base = EvmChain::new(EvmChainConfig {
                chain_type: ChainType::Base,
                rpc_url: rpc_url.clone(),
                indexer_url: indexer_url.clone(),
                token_address,
                token_decimals: args.base_token_decimals,
                rpc_timeout: Duration::from_secs(args.rpc_timeout_seconds),
                confirmation_timeout: Duration::from_secs(args.confirmation_timeout_seconds),
                indexer_page_limit: args.indexer_page_limit,
            })
            .context(ChainInitSnafu {
                chain: ChainType::Base,
            })?;
            registry.register(ChainType::Base, Arc::new(base));
        }
        (None, None, None) => info!("Base not configured, running Ethereum only"),
        _ => {
            return Err(Error::InvalidArgument {
                arg: "base-rpc-url",
                reason: "Base needs an RPC URL, an indexer URL and a token address".to_string(),
            })
        }
    }

    registry
        .require(args.proof_chain)
        .context(ChainInitSnafu {
            chain: args.proof_chain,
        })?;

    Ok(registry)
}

fn units(arg: &'static str, amount: Decimal, decimals: u8) -> Result<U256> {
    decimal_to_token_units(amount, decimals).ok_or_else(|| Error::InvalidArgument {
        arg,
        reason: format!("{amount} is not a representable amount"),
    })
}

fn start_services(
    args: &WagerServerArgs,
    settings: Arc<Settings>,
    db: Database,
    chains: Arc<ChainRegistry>,
    join_set: &mut JoinSet<Result<()>>,
) -> Result<WagerServices> {
    info!("Initializing services...");

    let notifications = Arc::new(NotificationHub::new());
    let keyring = Arc::new(PlatformKeyring::new(
        settings.clone(),
        Arc::new(db.platform_wallets()),
    ));

    let registration = RegistrationService::new(
        db.users(),
        settings.key_derivation(),
        args.reserved_index_floor,
    );

    let settler = BetSettler::new(
        Arc::new(db.bets()),
        chains.clone(),
        keyring.clone(),
        notifications.clone(),
        BetQueueConfig {
            proof_chain: args.proof_chain,
            payout_multiplier: args.payout_multiplier,
            refund_retry: RetryPolicy::new(args.bet_refund_attempts, Duration::from_millis(200)),
            recovery_interval: Duration::from_secs(args.bet_recovery_interval_seconds),
        },
    );
    let bets = BetSettlementQueue::spawn(settler, join_set);

    let gas_activation_threshold = units(
        "gas-activation-threshold",
        args.gas_activation_threshold,
        NATIVE_DECIMALS,
    )?;
    let gas_top_up_amount = units("gas-top-up-amount", args.gas_top_up_amount, NATIVE_DECIMALS)?;

    for chain_type in chains.registered_chains() {
        let chain: Arc<dyn ChainOperations> = chains
            .require(chain_type)
            .context(ChainInitSnafu { chain: chain_type })?;

        let listener = Arc::new(DepositListener::new(
            Arc::new(db.ledger()),
            chain.clone(),
            notifications.clone(),
            DepositListenerConfig {
                chain: chain_type,
                initial_lookback: Duration::from_secs(args.deposit_initial_lookback_seconds),
                max_pages: args.indexer_max_pages,
            },
        ));
        spawn_deposit_listener(
            listener,
            Duration::from_secs(args.deposit_poll_interval_seconds),
            join_set,
        );

        let collector = Arc::new(FundCollector::new(
            Arc::new(db.retry_queue()),
            chain.clone(),
            keyring.clone(),
            settings.key_derivation(),
            FundCollectorConfig {
                chain: chain_type,
                gas_activation_threshold,
                gas_top_up_amount,
                min_collection_amount: units(
                    "min-collection-amount",
                    args.min_collection_amount,
                    chain.token_decimals(),
                )?,
                retry: RetryPolicy::new(
                    args.sweep_retry_attempts,
                    Duration::from_millis(args.sweep_retry_base_delay_ms),
                ),
                requeue: RetryPolicy::new(
                    1,
                    Duration::from_secs(args.sweep_requeue_delay_seconds),
                ),
            },
        ));
        spawn_fund_collector(
            collector,
            Duration::from_secs(args.collection_interval_seconds),
            join_set,
        );

        info!(chain = %chain_type, "Deposit listener and fund collector started");
    }

    let executor = Arc::new(PayoutExecutor::new(chains.clone(), keyring));
    let withdrawals = Arc::new(WithdrawalProcessor::new(
        Arc::new(db.withdrawals()),
        executor,
    ));
    if let Some(seconds) = args.withdrawal_poll_interval_seconds {
        spawn_withdrawal_processor(withdrawals.clone(), Duration::from_secs(seconds), join_set);
    }

    Ok(WagerServices {
        db,
        notifications,
        registration,
        bets,
        withdrawals,
    })
}

pub fn install_metrics_recorder() -> Result<Arc<PrometheusHandle>> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(MetricsRecorderSnafu)?;
    let shared_handle = Arc::new(handle);

    describe_gauge!(
        "wager_metrics_exporter_up",
        "Set to 1 when the wager server metrics recorder is installed."
    );
    gauge!("wager_metrics_exporter_up").set(1.0);

    describe_counter!(BETS_TOTAL_METRIC, "Bets processed, by terminal status.");
    describe_histogram!(
        BET_SETTLEMENT_DURATION_METRIC,
        "Seconds from dequeue to terminal state for a bet."
    );
    describe_gauge!(BET_QUEUE_DEPTH_METRIC, "Bets waiting for the settlement consumer.");
    describe_counter!(DEPOSITS_CREDITED_METRIC, "Deposits credited to user balances.");
    describe_counter!(
        DEPOSIT_SCAN_FAILURES_METRIC,
        "Deposit addresses whose indexer scan failed in a round."
    );
    describe_counter!(SWEEP_ADDRESSES_METRIC, "Deposit addresses handled per sweep, by outcome.");
    describe_counter!(SWEEP_COLLECTED_METRIC, "Token base units swept into the collection wallet.");
    describe_counter!(WITHDRAWALS_TOTAL_METRIC, "Withdrawals processed, by outcome.");
    describe_counter!("wager_users_registered_total", "Users registered.");

    if PROMETHEUS_HANDLE.set(shared_handle.clone()).is_err() {
        if let Some(existing) = PROMETHEUS_HANDLE.get() {
            return Ok(existing.clone());
        }
    }

    Ok(shared_handle)
}

fn setup_metrics(join_set: &mut JoinSet<Result<()>>, addr: SocketAddr) -> Result<()> {
    let shared_handle = install_metrics_recorder()?;

    let upkeep_handle = shared_handle.clone();
    join_set.spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            upkeep_handle.run_upkeep();
        }
    });

    let metrics_state = shared_handle.clone();
    join_set.spawn(async move {
        let listener = TcpListener::bind(addr)
            .await
            .context(MetricsServerBindSnafu { addr })?;

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(metrics_state);

        info!("Metrics listening on {}", addr);
        axum::serve(listener, app)
            .await
            .context(MetricsServerSnafu)?;

        Ok(())
    });

    Ok(())
}

async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        handle.render(),
    )
}

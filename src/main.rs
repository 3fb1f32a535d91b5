//! xchain-relay - Cross-chain Deposit Relay
//!
//! ```text
//! custody webhook ──▶ Gateway ──▶ CallbackHandler ──▶ ActorRegistry ──▶ OrderActor
//!                                        ▲                  ▲   ▲            │
//!                               CustodyPoller     ConfirmationTimer  RetryLoop
//!                                                        ▲                  │
//!                                                        └── chain providers◀┘
//! ```
//!
//! Usage: `xchain-relay [--env <name>]` loads `config/<name>.yaml` (default `dev`).

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use xchain_relay::chain::{ChainProvider, FallbackProvider, JsonRpcProvider, ProviderRegistry};
use xchain_relay::config::AppConfig;
use xchain_relay::custody::{
    CallbackDeps, CustodyCallbackHandler, CustodyPoller, HttpCustodyClient, InMemoryDepositRoutes,
    poller_channel,
};
use xchain_relay::gateway::{self, AppState};
use xchain_relay::logging::init_logging;
use xchain_relay::notify::{Alarms, Auditor, LogAlarmSink, LogAuditSink};
use xchain_relay::order::StatusFlowRecorder;
use xchain_relay::relay::{ActorRegistry, DepositProcessor, ProcessorDeps, TimerHandles};
use xchain_relay::store::{
    FlowStore, InMemoryFlowStore, InMemoryOrderStore, OrderStore, PgFlowStore, PgOrderStore,
    postgres,
};
use xchain_relay::swap::DisabledSwap;
use xchain_relay::timer::{
    ConfirmationTimer, RetryCoordinator, RetryLoop, WatchClass, Watchdog, timer_channel,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

async fn build_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn OrderStore>, Arc<dyn FlowStore>)> {
    match &config.postgres_url {
        Some(url) => {
            let pool = postgres::connect(url).await?;
            Ok((
                Arc::new(PgOrderStore::new(pool.clone())),
                Arc::new(PgFlowStore::new(pool)),
            ))
        }
        None => {
            warn!("postgres_url not set, orders are kept in memory only");
            Ok((
                Arc::new(InMemoryOrderStore::new()),
                Arc::new(InMemoryFlowStore::new()),
            ))
        }
    }
}

fn build_chains(config: &AppConfig) -> anyhow::Result<ProviderRegistry> {
    let mut chains = ProviderRegistry::new();

    for provider in &config.providers {
        let endpoints = provider
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, url)| {
                JsonRpcProvider::new(format!("{}-{}", provider.family, i), url, provider.call_timeout())
                    .map(|p| Arc::new(p) as Arc<dyn ChainProvider>)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Provider {}: {}", provider.family, e))?;

        info!(family = %provider.family, endpoints = endpoints.len(), "Chain provider configured");
        chains.register_provider(
            provider.family,
            Arc::new(FallbackProvider::new(
                provider.family.to_string(),
                endpoints,
                provider.call_timeout(),
            )),
        );
    }

    if config.providers.is_empty() {
        register_mock_providers(&mut chains);
    }

    for chain in &config.chains {
        info!(chain_id = %chain.chain_id, family = %chain.family, "Destination chain registered");
        chains.register_chain(chain.clone());
    }
    Ok(chains)
}

#[cfg(feature = "mock-api")]
fn register_mock_providers(chains: &mut ProviderRegistry) {
    use xchain_relay::chain::{ChainFamily, MockChainProvider};

    warn!("No chain providers configured, using in-process mock providers");
    for family in [ChainFamily::Native, ChainFamily::Evm, ChainFamily::Solana] {
        chains.register_provider(family, Arc::new(MockChainProvider::new(family.to_string())));
    }
}

#[cfg(not(feature = "mock-api"))]
fn register_mock_providers(_chains: &mut ProviderRegistry) {
    warn!("No chain providers configured, releases will fail until one is added");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    info!(env = %env, git_hash = env!("GIT_HASH"), "Starting xchain-relay");

    let (store, flow_store) = build_stores(&config).await?;
    let flow = StatusFlowRecorder::new(flow_store);
    let chains = Arc::new(build_chains(&config)?);
    let alarms = Alarms::new(Arc::new(LogAlarmSink), config.relay.alarm_timeout());

    // Loop channels first; the loops themselves need the registry
    let (normal_handle, normal_rx) = timer_channel(WatchClass::Normal);
    let (fast_handle, fast_rx) = timer_channel(WatchClass::Fast);
    let (retry, retry_rx) = RetryCoordinator::new(flow.clone(), config.timers.retry_delay());
    let (watchdog_handle, watchdog_rx) =
        Watchdog::channel(Duration::from_secs(config.relay.watchdog_delay_secs));
    let (poller_handle, poller_rx) = poller_channel();

    let processor = Arc::new(DepositProcessor::new(
        ProcessorDeps {
            store: store.clone(),
            flow: flow.clone(),
            chains: chains.clone(),
            swap: Arc::new(DisabledSwap),
            alarms: alarms.clone(),
            audit: Auditor::new(Arc::new(LogAuditSink)),
            timers: TimerHandles {
                normal: normal_handle,
                fast: fast_handle,
            },
            retry,
            watchdog: watchdog_handle,
            custody: poller_handle.clone(),
        },
        config.relay.clone(),
    ));
    let registry = Arc::new(ActorRegistry::new(processor));

    let custody_client = Arc::new(HttpCustodyClient::new(
        &config.custody.base_url,
        &config.custody.api_key,
    )?);
    let callback = Arc::new(
        CustodyCallbackHandler::new(
            &config.custody,
            config.relay.order_ttl_secs,
            CallbackDeps {
                store: store.clone(),
                flow,
                driver: registry.clone(),
                client: custody_client.clone(),
                routes: Arc::new(InMemoryDepositRoutes::new(
                    config.custody.deposit_routes.iter().cloned(),
                )),
                alarms: alarms.clone(),
                poller: poller_handle,
            },
        )
        .map_err(|e| anyhow::anyhow!("Invalid custody config: {}", e))?,
    );

    let timers = &config.timers;
    tokio::spawn(
        ConfirmationTimer::new(
            WatchClass::Normal,
            normal_rx,
            chains.clone(),
            registry.clone(),
            timers.confirm_normal,
            timers.max_not_found,
        )
        .run(),
    );
    tokio::spawn(
        ConfirmationTimer::new(
            WatchClass::Fast,
            fast_rx,
            chains,
            registry.clone(),
            timers.confirm_fast,
            timers.max_not_found,
        )
        .run(),
    );
    tokio::spawn(RetryLoop::new(retry_rx, registry.clone(), timers.retry).run());
    tokio::spawn(Watchdog::new(watchdog_rx, store, alarms, timers.watchdog).run());
    tokio::spawn(
        CustodyPoller::new(poller_rx, custody_client, callback.clone(), timers.custody_poll).run(),
    );

    match registry.recover().await {
        Ok(report) => info!(
            rewatched = report.rewatched,
            redriven = report.redriven,
            "Resumed active orders"
        ),
        Err(e) => error!(error = %e, "Recovery failed, active orders resume on their next input"),
    }

    let state = Arc::new(AppState::new(callback, registry));
    tokio::select! {
        result = gateway::run_server(&config.gateway.host, config.gateway.port, state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }
    Ok(())
}

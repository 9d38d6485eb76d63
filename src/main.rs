//! Ledger node resilience daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                 LEDGER RESILIENCE                    │
//!                 │                                                      │
//!   caller ──────▶│  ResilientRpcFacade ──▶ ChainCache (TTL, sweeper)    │
//!                 │        │                                             │
//!                 │        ▼                                             │
//!                 │  RetryExecutor ──▶ MetricsCollector                  │
//!                 │        │                                             │
//!                 │        ▼                                             │
//!                 │  BlockchainClient (alloy, failover, timeouts) ───────┼──▶ JSON-RPC node
//!                 │        ▲                         ▲                   │
//!                 │        │                         │                   │
//!                 │  TransactionMonitor     EventSubscriptionRegistry    │
//!                 │  (task per handle)      (task per live listener)     │
//!                 │                                                      │
//!                 │  Shutdown (watch channel) stops every background task│
//!                 └──────────────────────────────────────────────────────┘
//! ```

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, TxHash, B256};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ledger_resilience::blockchain::BlockchainClient;
use ledger_resilience::cache::ChainCache;
use ledger_resilience::clock::system_clock;
use ledger_resilience::config::{load_config, ResilienceConfig};
use ledger_resilience::events::{EventKind, EventSubscriptionRegistry, LoggingEventHandler};
use ledger_resilience::observability::{logging, metrics, MetricsCollector};
use ledger_resilience::resilience::{RetryExecutor, RetryPolicy};
use ledger_resilience::transactions::{ChannelCallback, TransactionMonitor};
use ledger_resilience::{ResilientRpcFacade, Shutdown};

#[derive(Parser)]
#[command(name = "ledger-resilience")]
#[command(about = "Resilient access to a ledger JSON-RPC node", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep caches and listen to configured contracts until Ctrl-C
    Run,
    /// Print chain state, cache and metrics once
    Status,
    /// Print the balance of an address
    Balance { address: Address },
    /// Poll a transaction until it confirms, fails or times out
    WatchTx {
        hash: TxHash,
        /// Poll interval in seconds (configured default when omitted)
        #[arg(short, long, default_value_t = 0)]
        interval: u32,
    },
    /// Query historical events of a contract
    History {
        contract: Address,
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
        /// Only this event signature (topic0)
        #[arg(long)]
        signature: Option<B256>,
        /// Only events whose indexed arguments reference this address
        #[arg(long)]
        target: Option<Address>,
    },
}

/// Everything the subcommands need, built once from configuration.
struct Components {
    config: ResilienceConfig,
    client: Arc<BlockchainClient>,
    facade: ResilientRpcFacade,
    cache: ChainCache,
    metrics: Arc<MetricsCollector>,
    monitor: TransactionMonitor,
    registry: EventSubscriptionRegistry,
}

impl Components {
    async fn build(config: ResilienceConfig, shutdown: &Shutdown) -> Result<Self, Box<dyn std::error::Error>> {
        let clock = system_clock();
        let client = Arc::new(BlockchainClient::new(config.node.clone()).await?);
        let metrics = Arc::new(MetricsCollector::with_clock(clock.clone()));
        let cache = ChainCache::new(&config.cache, clock.clone());
        let retry = RetryExecutor::new(RetryPolicy::from(&config.retry)).with_shutdown(shutdown.subscribe());

        let facade = ResilientRpcFacade::new(
            client.clone(),
            retry,
            cache.clone(),
            metrics.clone(),
            config.fallback.clone(),
        );
        let monitor = TransactionMonitor::new(
            client.clone(),
            config.monitor.clone(),
            clock.clone(),
            shutdown.subscribe(),
        );
        let registry = EventSubscriptionRegistry::new(
            client.clone(),
            Arc::new(LoggingEventHandler),
            clock,
            shutdown.subscribe(),
        );

        Ok(Self {
            config,
            client,
            facade,
            cache,
            metrics,
            monitor,
            registry,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };
    logging::init(&config.observability.log_level);

    tracing::info!("ledger-resilience v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        rpc_url = %config.node.rpc_url,
        failover_urls = config.node.failover_urls.len(),
        chain_id = config.node.chain_id,
        max_attempts = config.retry.max_attempts,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let components = Components::build(config, &shutdown).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&components, &shutdown).await?,
        Commands::Status => print_status(&components).await?,
        Commands::Balance { address } => {
            let balance = components.facade.get_balance(address).await?;
            println!("{} ETH ({} wei)", format_ether(balance), balance);
        }
        Commands::WatchTx { hash, interval } => watch_tx(&components, hash, interval).await,
        Commands::History {
            contract,
            from,
            to,
            signature,
            target,
        } => {
            let logs = match target {
                Some(target) => {
                    components
                        .registry
                        .get_address_historical_events(contract, target, from, to)
                        .await?
                }
                None => {
                    components
                        .registry
                        .get_historical_events(contract, signature, from, to)
                        .await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&logs)?);
        }
    }

    shutdown.trigger();
    components.monitor.shutdown();
    components.registry.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run(components: &Components, shutdown: &Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let config = &components.config;

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let sweeper = components.cache.spawn_sweeper(
        Duration::from_secs(config.cache.sweep_interval_secs),
        shutdown.subscribe(),
    );

    if !components.client.is_healthy().await {
        tracing::warn!("Node unreachable at startup; calls will retry and degrade");
    }

    if config.events.enabled {
        components.registry.start_listening();
        for contract in &config.events.contracts {
            // Validated at load time.
            let (Ok(address), Ok(signature)) = (contract.address.parse::<Address>(), contract.signature.parse::<B256>()) else {
                continue;
            };
            let kind = EventKind::classify(Some(signature));
            components
                .registry
                .create_subscription(&contract.contract_type, address, kind.as_str(), signature);
            components.registry.start_contract_listening(address, signature);
        }
        tracing::info!(
            contracts = config.events.contracts.len(),
            "Contract listeners started"
        );
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C, shutting down");
    shutdown.trigger();
    if sweeper.await.is_err() {
        tracing::warn!("Cache sweeper ended abnormally");
    }

    let subscriptions = components.registry.active_subscriptions();
    println!("{}", serde_json::to_string_pretty(&subscriptions)?);
    println!("{}", serde_json::to_string_pretty(&components.metrics.snapshot())?);
    Ok(())
}

async fn print_status(components: &Components) -> Result<(), Box<dyn std::error::Error>> {
    let connected = components.facade.is_connected().await;
    println!("connected:    {}", connected);

    match components.client.get_chain_id().await {
        Ok(chain_id) => println!("chain id:     {}", chain_id),
        Err(e) => println!("chain id:     unavailable ({})", e),
    }
    match components.facade.get_block_number().await {
        Ok(block) => println!("block number: {}", block),
        Err(e) => println!("block number: unavailable ({})", e),
    }
    let gas_price = components.facade.get_gas_price().await?;
    println!("gas price:    {} wei", gas_price);

    println!("cache:        {}", serde_json::to_string(&components.facade.cache_stats())?);
    println!("health:       {}", serde_json::to_string(&components.metrics.health())?);
    println!("{}", serde_json::to_string_pretty(&components.metrics.snapshot())?);
    Ok(())
}

async fn watch_tx(components: &Components, hash: TxHash, interval: u32) {
    let (callback, mut outcomes) = ChannelCallback::channel();
    components.monitor.start_monitoring(hash, interval, Arc::new(callback));

    tokio::select! {
        outcome = outcomes.recv() => match outcome {
            Some(outcome) => println!("{:?}", outcome),
            None => println!("monitor stopped without an outcome"),
        },
        _ = tokio::signal::ctrl_c() => {
            components.monitor.stop_monitoring(&hash);
            println!("stopped watching {}", hash);
        }
    }
}

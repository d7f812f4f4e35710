//! Switchboard - tiered pool of conversational orchestrators

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::{
    config::Args,
    logging::UsageLogger,
    reload::{InMemoryBroker, NatsReloadBroker, ReloadBroker, ReloadConsumer},
    store::{ConfigStore, InMemoryConfigStore, MongoConfigStore},
    ChangeDetector, InstanceBuilder, PoolManager, SharedResources, SwitchboardService,
};
use switchboard_agent::backend::ProviderClientFactory;
use switchboard_agent::PluginRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("switchboard={},info", args.log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Switchboard - orchestrator pool");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Hot pool: {}", args.max_hot_pool_size);
    info!("Prewarm: {}", args.prewarm);
    info!("History limit: {}", args.history_limit);
    info!("Default model: {}/{}", args.default_provider, args.default_model);
    info!("======================================");

    // Configuration store (in-memory fallback in dev mode)
    let store: Arc<dyn ConfigStore> = match MongoConfigStore::connect(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Arc::new(store)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Arc::new(InMemoryConfigStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Reload broker (in-memory fallback in dev mode)
    let client_name = format!("switchboard-{}", args.node_id);
    let broker: Arc<dyn ReloadBroker> = match NatsReloadBroker::connect(&args.nats, &client_name).await {
        Ok(broker) => {
            info!("NATS connected successfully");
            Arc::new(broker)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, reloads stay local): {}", e);
                Arc::new(InMemoryBroker::default())
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let resources = SharedResources::new(Arc::new(ProviderClientFactory), args.registry_config());
    let builder = InstanceBuilder::new(
        PluginRegistry::new(),
        resources.clone(),
        Arc::new(args.config_defaults()),
    );
    let pool = Arc::new(PoolManager::new(store.clone(), builder.clone(), args.pool_config()));

    let usage = UsageLogger::new(args.node_id.to_string());
    if let Some(path) = args.usage_log.clone() {
        if let Err(e) = usage.init_file(path).await {
            warn!("Usage log unavailable: {}", e);
        }
    }

    let changes = ChangeDetector::new(store.clone(), broker.clone(), builder, args.node_id.to_string());
    let service = Arc::new(
        SwitchboardService::new(pool.clone(), changes, usage).with_conversations(args.conversation_config()),
    );

    // Subscribe before prewarm so no event published meanwhile is missed
    let consumer = ReloadConsumer::new(pool.clone(), broker.clone()).spawn().await?;

    match pool.prewarm(args.prewarm).await {
        Ok(report) => info!(promoted = report.promoted, failed = report.failed, "Prewarm finished"),
        Err(e) => warn!("Prewarm skipped: {}", e),
    }

    let reaper = resources.spawn_reaper();
    let sweeper = pool.spawn_sweeper();
    let conversation_sweeper = service.spawn_conversation_sweeper();
    let stats = spawn_stats_logger(service.clone(), Duration::from_secs(args.stats_interval_secs));

    info!("Switchboard ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    consumer.abort();
    sweeper.abort();
    conversation_sweeper.abort();
    stats.abort();
    pool.shutdown().await;
    reaper.abort();
    let reaped = resources.reap();
    info!(reaped, "Switchboard stopped");

    Ok(())
}

/// Periodically log pool statistics
fn spawn_stats_logger(service: Arc<SwitchboardService>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = service.pool_stats().await;
            let references: usize = stats.resources.iter().map(|r| r.references).sum();
            info!(
                cold = stats.cold,
                warm = stats.warm,
                hot = stats.hot,
                leases = stats.leases,
                shared_references = references,
                estimated_memory_mb = stats.estimated_memory_bytes / (1024 * 1024),
                "Pool stats"
            );
        }
    })
}

//! Fleetup server — multi-tenant device update management.
//!
//! Wires the store, event bus, caches and background executors together.
//! Transports (device polling, management API) attach to the same service
//! layer this binary spawns.

use std::sync::Arc;

use clap::Parser;

use fleetup_server::cache::TenantCache;
use fleetup_server::config::ServerConfig;
use fleetup_server::events::{EntityKind, Event, EventBus};
use fleetup_server::services::executor;
use fleetup_server::services::filter_service::MATCH_COUNT_PREFIX;
use fleetup_server::store::Store;
use fleetup_server::{metrics, seeder};

#[derive(Parser)]
#[command(name = "fleetup", about = "Fleetup device update server")]
struct Cli {
    /// Seed a demo tenant at startup
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = ServerConfig::from_env();

    tracing::info!("Starting Fleetup server...");

    metrics::init_metrics();

    let store = Arc::new(Store::new());
    let bus = Arc::new(EventBus::new());
    let match_count_cache: Arc<TenantCache<usize>> =
        Arc::new(TenantCache::from_spec(&config.cache_spec));

    // Target changes invalidate cached filter match counts for the tenant.
    {
        let cache = match_count_cache.clone();
        bus.subscribe("filter-match-cache", move |event: &Event| {
            if event.kind() == EntityKind::Target {
                cache.invalidate_prefix(event.tenant(), MATCH_COUNT_PREFIX);
            }
        });
    }

    if cli.demo {
        let tenant = seeder::seed_demo(&store, &bus)?;
        tracing::info!(tenant = %tenant, "Demo tenant seeded");
    }

    tokio::spawn(executor::run_auto_assign_loop(
        store.clone(),
        bus.clone(),
        config.clone(),
    ));
    tokio::spawn(executor::run_rollout_loop(
        store.clone(),
        bus.clone(),
        config.clone(),
    ));

    shutdown_signal().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

//! Coruscant Bank loan liquidation service.
//!
//! Tracks Beskar-collateralized loans through their lifecycle, ingests
//! the two venue price streams, and autonomously sells collateral once a
//! loan's LTV breaches the liquidation threshold. Exposes a small HTTP
//! API for registration and top-ups and publishes lifecycle events to
//! the bank's message bus.

mod http;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coruscant_api::{BlackSpireClient, HttpBusClient, MosEspaClient, Venue};
use coruscant_core::{
    config::{BLACK_SPIRE_PRICES_TOPIC, MOS_ESPA_PRICES_TOPIC},
    run_feed_ingest, AppConfig, Clock, EventPublisher, KeyedLocks, LifecycleEngine,
    LiquidationQueue, LiquidationRunner, LtvEvaluator, PriceBook, SystemClock, VenueClients,
};
use coruscant_store::MemoryLoanStore;

/// Pending liquidation jobs the queue will hold before deferring to the
/// recovery sweep.
const LIQUIDATION_QUEUE_CAPACITY: usize = 64;

/// How often the recovery sweep re-enqueues in-flight liquidations.
const RECOVERY_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coruscant_core=debug")),
        )
        .init();

    let config = AppConfig::from_env();
    config.log_config();

    info!("Starting Coruscant Bank loan liquidation service");

    let (state, bind) = initialize_components(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "HTTP surface listening");
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn initialize_components(config: AppConfig) -> Result<(http::AppState, String)> {
    info!("Initializing components...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryLoanStore::new());
    let locks = Arc::new(KeyedLocks::new());

    // Bus client (publisher + feed consumer)
    let bus = Arc::new(HttpBusClient::new(config.bus_endpoint.clone())?);
    let publisher = Arc::new(EventPublisher::new(
        bus.clone(),
        config.loan_events_topic.clone(),
    ));
    info!(endpoint = %config.bus_endpoint, "bus client ready");

    // Price aggregation: one ingest task per venue feed
    let book = Arc::new(PriceBook::new(clock.clone(), config.max_tick_age()));
    tokio::spawn(run_feed_ingest(
        book.clone(),
        bus.clone(),
        Venue::MosEspa,
        MOS_ESPA_PRICES_TOPIC.to_string(),
    ));
    tokio::spawn(run_feed_ingest(
        book.clone(),
        bus.clone(),
        Venue::BlackSpire,
        BLACK_SPIRE_PRICES_TOPIC.to_string(),
    ));

    // Venue order clients
    let mos_espa = Arc::new(MosEspaClient::new(
        config.venue_a_url.clone(),
        config.venue_http_timeout(),
    )?);
    let black_spire = Arc::new(BlackSpireClient::new(
        config.venue_b_url.clone(),
        config.venue_http_timeout(),
    )?);
    info!(
        venue_a = %config.venue_a_url,
        venue_b = %config.venue_b_url,
        "venue clients ready"
    );

    // Liquidation engine: bounded queue, worker pool, recovery paths
    let (queue, jobs) = LiquidationQueue::new(LIQUIDATION_QUEUE_CAPACITY);
    let runner = Arc::new(LiquidationRunner::new(
        store.clone(),
        book.clone(),
        publisher.clone(),
        VenueClients {
            mos_espa,
            black_spire,
        },
        clock.clone(),
        config.venue_retry_cap(),
    ));
    let _workers = runner.spawn_workers(config.liquidation_workers, jobs);
    info!(workers = config.liquidation_workers, "liquidation pool running");

    runner.startup_scan(&queue);
    tokio::spawn(
        runner
            .clone()
            .run_recovery_sweep(queue.clone(), RECOVERY_SWEEP_INTERVAL),
    );

    // LTV evaluator wired to tick notifications and top-up probes
    let (probe_tx, probe_rx) = mpsc::unbounded_channel();
    let ticks = book.subscribe();
    let evaluator = Arc::new(LtvEvaluator::new(
        store.clone(),
        book.clone(),
        publisher.clone(),
        locks.clone(),
        clock.clone(),
        queue,
        &config,
    ));
    tokio::spawn(evaluator.run(ticks, probe_rx));

    // Lifecycle engine behind the HTTP surface
    let lifecycle = Arc::new(
        LifecycleEngine::new(store, publisher, locks, clock).with_activation_probe(probe_tx),
    );

    info!("All components initialized");

    Ok((http::AppState { lifecycle }, config.http_bind))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

fn print_banner() {
    println!(
        r#"
    ╔═╗┌─┐┬─┐┬ ┬┌─┐┌─┐┌─┐┌┐┌┌┬┐  ╔╗ ┌─┐┌┐┌┬┌─
    ║  │ │├┬┘│ │└─┐│  ├─┤│││ │   ╠╩╗├─┤│││├┴┐
    ╚═╝└─┘┴└─└─┘└─┘└─┘┴ ┴┘└┘ ┴   ╚═╝┴ ┴┘└┘┴ ┴
    Loan Liquidation Service v0.1.0
    "#
    );
}

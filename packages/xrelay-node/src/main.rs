use std::sync::Arc;
use std::time::Duration;

use xrelay_core::evm::{EventDecoder, EvmSource};
use xrelay_core::CachedTokenRegistry;
use xrelay_node::api::{self, AppState};
use xrelay_node::lcd_client::LcdClient;
use xrelay_node::{
    db, metrics, Config, EnvelopeStore, MemoryStore, MessengerExecutor, MessengerQuerier,
    Orchestrator, PgStore, SourceWatcher, WatcherManager,
};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting XRelay node");

    let config = Config::load()?;
    tracing::info!(
        sources = config.sources.len(),
        destination_chain = %config.destination.chain_id,
        messenger = %config.destination.messenger_address,
        "Configuration loaded"
    );

    let store: Arc<dyn EnvelopeStore> = match &config.database {
        Some(database) => {
            let pool = db::create_pool(&database.url).await?;
            tracing::info!("Database connected");
            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, relay state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Destination
    let lcd = Arc::new(LcdClient::new(&config.destination)?);
    tracing::info!(relayer = %lcd.address, "Destination signer loaded");

    let executor = Arc::new(MessengerExecutor::new(
        lcd.clone(),
        config.destination.messenger_address.clone(),
        config.destination.finality_timeout(),
    ));
    let registry = Arc::new(CachedTokenRegistry::new(
        Arc::new(MessengerQuerier::new(
            lcd,
            config.destination.messenger_address.clone(),
        )),
        Duration::from_secs(config.relay.token_cache_ttl_secs),
        Duration::from_secs(config.relay.token_cache_negative_ttl_secs),
    ));

    // Sources
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(config.relay.queue_capacity);
    let mut watchers = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let bus_address = source.bus_address()?;
        let chain = EvmSource::new(
            &source.rpc_url,
            source.chain_id,
            bus_address,
            source.max_block_range,
        )?;
        watchers.push(SourceWatcher::new(
            source.name.clone(),
            Arc::new(chain),
            store.clone(),
            EventDecoder::new(source.chain_id, bus_address),
            events_tx.clone(),
            source.start_block,
            source.poll_interval(),
            source.max_block_range,
        ));
    }
    drop(events_tx);
    let watcher_manager = WatcherManager::new(watchers);

    let orchestrator = Orchestrator::new(
        config.relay.orchestrator(),
        store.clone(),
        executor,
        registry,
    );

    // Create shutdown channels
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (shutdown_tx2, shutdown_rx2) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
        let _ = shutdown_tx2.send(()).await;
    });

    // Start metrics/API server
    let api_state = AppState::new(store, orchestrator.attempt_log());
    let api_addr = config.api.bind_addr;
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_addr, api_state).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    metrics::set_up(true);
    tracing::info!("Relay initialized, starting processing");

    tokio::select! {
        result = watcher_manager.run(shutdown_rx) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Watcher manager error");
            }
        }
        result = orchestrator.run(events_rx, shutdown_rx2) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Orchestrator error");
            }
        }
    }

    metrics::set_up(false);
    tracing::info!("XRelay node stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xrelay_node=debug,xrelay_core=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

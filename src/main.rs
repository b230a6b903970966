use std::sync::Arc;
use tracing::{error, info};

mod cache;
mod chat;
mod config;
mod entity;
mod error;
mod escalation;
mod history;
mod interface;
mod presence;
mod registry;
mod router;
mod store;

use escalation::{EscalationDispatcher, LogDispatcher, QueueDispatcher};
use interface::http::{AppState, ChatServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Parley chat server starting...");

    let config = config::Config::from_env()?;

    info!("Initializing store at {}", config.db_path.display());
    let store = Arc::new(store::Store::new(&config.db_path).await?);
    store.init().await?;

    let cache = Arc::new(cache::ConversationCache::new(config.cache_ttl));
    let history = Arc::new(history::ReadThroughHistory::new(cache.clone(), store.clone()));
    let registry = Arc::new(registry::ConnectionRegistry::new(config.outbox_capacity));

    // Escalation goes to Telegram when a bot token is configured
    let (dispatcher, telegram_handle): (Arc<dyn EscalationDispatcher>, _) =
        match &config.telegram_token {
            Some(token) => {
                let notifier = interface::telegram::TelegramNotifier::new(token)?;
                let (dispatcher, jobs) = QueueDispatcher::new(config.escalation_queue);
                let handle = tokio::spawn(notifier.run(jobs));
                let dispatcher: Arc<dyn EscalationDispatcher> = Arc::new(dispatcher);
                (dispatcher, Some(handle))
            }
            None => {
                info!("No Telegram token found, escalations will only be logged.");
                let dispatcher: Arc<dyn EscalationDispatcher> = Arc::new(LogDispatcher);
                (dispatcher, None)
            }
        };

    let router = Arc::new(router::MessageRouter::new(
        store.clone(),
        history.clone(),
        dispatcher,
        registry.clone(),
        config.max_message_len,
    ));

    let purge_interval = config.cache_purge_interval;
    let purge_cache = cache.clone();
    let purge_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        loop {
            ticker.tick().await;
            purge_cache.purge_expired();
        }
    });

    let app = ChatServer::new(AppState {
        router,
        history,
        store,
    })
    .router();

    info!("Starting chat server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    let telegram_handle = tokio::spawn(async move {
        match telegram_handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Telegram worker stopped with error: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = purge_handle => {
            error!("Cache purge task stopped unexpectedly");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
        _ = telegram_handle => {
            error!("Telegram worker finished unexpectedly");
        }
    }

    info!("{} live connections at shutdown", registry.len());

    Ok(())
}

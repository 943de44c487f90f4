use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use listwatch_client::BrowserSessionManager;
use listwatch_core::{
    CrawlActions, CrawlConfig, CrawlEngine, Dispatcher, JobRegistry, RateController,
    TracingWorkerReporter,
};
use listwatch_server::config::ServerConfig;
use listwatch_server::routes;
use listwatch_server::state::AppState;
use listwatch_store::JsonListingStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("listwatch=info".parse()?))
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;
    if config.api_key.is_none() {
        tracing::warn!("LISTWATCH_API_KEY is not set; /v1 endpoints will refuse every request");
    }

    let store = JsonListingStore::from_config(&config.store);
    store.health_check().await?;
    tracing::info!(data_dir = %store.root().display(), "Listing store ready");

    let browser = BrowserSessionManager::launch(config.browser.clone()).await?;
    tracing::info!(headless = config.browser.headless, "Browser launched");

    let (registry, receiver) = JobRegistry::new(config.retention);

    let rate = Arc::new(RateController::new(config.rate.clone()));
    let engine = CrawlEngine::new(store.clone(), rate, CrawlConfig::default());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        browser.clone(),
        CrawlActions::new(engine),
        config.dispatcher.clone(),
    );

    let cancel = CancellationToken::new();
    let dispatcher_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            dispatcher
                .run(receiver, cancel, TracingWorkerReporter)
                .await
        }
    });

    let state = Arc::new(AppState {
        registry,
        store,
        browser: Some(browser.clone()),
        api_key: config.api_key.clone(),
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.addr();
    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    match dispatcher_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Dispatcher stopped with an error"),
        Err(e) => tracing::error!(error = %e, "Dispatcher task failed"),
    }
    browser.shutdown().await;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use cowatch_server::config::{LogFormat, ServerConfig};
use cowatch_server::{build_app_with_store, spawn_lobby_refresher, store};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() {
    // The log format lives in the config, so read that before anything logs.
    let config = ServerConfig::load();
    init_tracing(config.log_format);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        backend = ?config.store.backend,
        "Cowatch server starting"
    );

    let repository = match store::connect(&config.store).await {
        Ok(repo) => repo,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open store");
            std::process::exit(1);
        },
    };

    let listen_addr = config.listen_addr.clone();
    let (app, state) = build_app_with_store(config, repository);
    spawn_lobby_refresher(&state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(addr = %listen_addr, "Listening");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

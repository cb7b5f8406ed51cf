//! Gateway entry point.

use jina_gateway::{create_router, AppState, GatewayConfig, GatewayError};

use log::{error, info};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = GatewayConfig::from_env()?;
    info!("Starting Jina AI Proxy API on {}", config.bind_addr());
    info!(
        "Proxy rotation: {}, strategy: {}, direct fallback: {}",
        config.use_proxies,
        config.pool.selection_strategy.as_str(),
        config.pool.direct_fallback
    );

    let state = AppState::from_config(&config).await?;
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

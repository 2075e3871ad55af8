//! Signaling server entry point

use anyhow::Result;
use clap::Parser;
use roulette_signaling::dispatcher::DrainOutcome;
use roulette_signaling::{AppState, Config, ServerState, build_router};
use std::future::IntoFuture;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    let addr = config.bind_addr()?;

    let signaling = ServerState::new(config.engine_options());
    let state = AppState::new(signaling.clone(), config.ice_provider()?);
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "signaling server listening");

    // Upgraded sockets never finish on their own, so serving is raced
    // against the signal instead of using graceful shutdown.
    tokio::select! {
        result = axum::serve(listener, router).into_future() => result?,
        () = shutdown_signal() => tracing::info!("shutdown signal received"),
    }

    match signaling.shutdown().await {
        DrainOutcome::Drained => tracing::info!("shutdown complete"),
        DrainOutcome::Cancelled(n) => tracing::warn!(cancelled = n, "shutdown forced"),
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

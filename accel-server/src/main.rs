//! Registry pull-through accelerator -- admin/control API.
//!
//! Binds a cache, an upstream cascade, a P2P blob-exchange node, a TUF
//! metadata manager, and the auth/lock/audit/automation security envelope
//! into a single Axum server. The HTTP surface is documented module by
//! module under [`handlers`]; [`routes::build_router`] is the table of
//! contents.

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::Args;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "accel_server=debug,accel_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting accel-server");
    info!(data_dir = %args.data_dir.display(), "data directory");

    if args.p2p_disabled {
        warn!("P2P blob exchange disabled via ACCEL_P2P_DISABLED");
    }

    let state = AppState::bootstrap(&args).await.map_err(|e| {
        error!("failed to bootstrap server state: {e}");
        e
    })?;

    state.start_background_tasks().await?;
    info!("background tasks started (p2p, tuf auto-refresh, automation)");

    let app = routes::build_router(state.clone());

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {addr}");

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let shutdown_state = state.clone();
    let result = axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutting down background tasks");
    shutdown_state.stop_background_tasks().await;

    result?;
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

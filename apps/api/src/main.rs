//! # DOKO API Server
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          DOKO API Server                                │
//! │                                                                         │
//! │  Browser ───► HTTP (8080) ───► Services ───► SQLite                    │
//! │                                   │   │                                 │
//! │               eSewa / Khalti ◄────┘   └──► notifications ──► email log  │
//! │                      ▲                                                  │
//! │                      └──── reconciler (every RECONCILE_INTERVAL_SECS)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use doko_api::services::notification_service::BroadcastNotifier;
use doko_api::services::payment_service::PaymentService;
use doko_api::{router, ApiConfig, AppState};
use doko_db::{Database, DbConfig};
use doko_gateway::GatewayRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("doko_api=info,doko_db=info,doko_gateway=info")),
        )
        .with_target(true)
        .init();

    info!("Starting DOKO API server...");

    let config = ApiConfig::load().context("invalid configuration")?;
    info!(
        port = config.http_port,
        database = %config.database_path,
        esewa = config.esewa.is_some(),
        khalti = config.khalti.is_some(),
        "Configuration loaded"
    );
    if config.uses_dev_secret() {
        warn!("JWT_SECRET not set, using the development secret");
    }

    let db = Database::new(DbConfig::new(&config.database_path))
        .await
        .context("failed to open database")?;
    info!("Database ready");

    let gateways = GatewayRegistry::from_configs(config.esewa.clone(), config.khalti.clone())
        .context("invalid payment gateway configuration")?;

    let state = AppState::new(db.clone(), gateways, &config);

    tokio::spawn(email_worker(state.notifier.clone()));
    tokio::spawn(reconciler(state.payments.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Logs every notification. Stands in for the mail sender.
async fn email_worker(notifier: Arc<BroadcastNotifier>) {
    let mut rx = notifier.subscribe();
    loop {
        match rx.recv().await {
            Ok(notification) => info!(?notification, "Notification queued for email"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Email worker fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Email worker stopped");
}

/// Re-verifies payments whose redirect never came back.
async fn reconciler(payments: Arc<PaymentService>) {
    let policy = *payments.policy();
    let mut ticker = tokio::time::interval(policy.reconcile_interval);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = payments.reconcile_stale(policy.reconcile_after).await {
            warn!(error = %e, "Reconciliation pass failed");
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}

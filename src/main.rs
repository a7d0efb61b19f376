use std::sync::Arc;

use anyhow::Context;
use chatroom::{AppState, chat::ChatService, config::Config, store::FileRoomLog, telemetry};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init(&cfg)?;

    let store = FileRoomLog::open(&cfg.storage_root).with_context(|| {
        format!("creating storage root {}", cfg.storage_root.display())
    })?;
    info!(root = %cfg.storage_root.display(), "storing room logs");

    let chat = Arc::new(ChatService::new(
        Arc::new(store),
        cfg.queue_capacity,
        cfg.queue_policy,
    ));
    chat.start();

    let app = chatroom::app(AppState { chat: chat.clone() }, &cfg);

    let listener = TcpListener::bind(cfg.addr)
        .await
        .with_context(|| format!("binding {}", cfg.addr))?;
    info!("Server started at http://{}", cfg.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    info!("Shutting down server...");
    let report = chat.shutdown(cfg.shutdown_timeout).await;
    if report.drained && report.lost.is_empty() {
        info!("Server exited gracefully");
    } else {
        warn!(
            drained = report.drained,
            lost = report.lost_count(),
            "Server exited with unwritten messages"
        );
    }

    Ok(())
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

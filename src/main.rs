use std::net::SocketAddr;

use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use steamqueue::config::Config;
use steamqueue::queue::events::QueueEvent;
use steamqueue::queue::{QueueManager, StopMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = Config::from_env()?;

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    tracing::info!("Starting steamqueue");

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let addr = SocketAddr::new(config.host, config.port);
    let autostart = config.autostart;
    let state = steamqueue::build_state(config).await?;
    let queue = state.queue.clone();

    spawn_event_logger(&queue);

    if autostart {
        queue.start_processing().await;
    }

    let app = steamqueue::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.stop_processing(StopMode::CancelCurrent).await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Consume queue events off the request path.
fn spawn_event_logger(queue: &QueueManager) {
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent { kind, snapshot }) => tracing::debug!(
                    "Queue event {kind:?}: {} queued, {} in history",
                    snapshot.queue.len(),
                    snapshot.history.len()
                ),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Event logger lagged, skipped {missed} event(s)")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

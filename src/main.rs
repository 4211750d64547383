use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use signaling_relay::config::Settings;
use signaling_relay::postgres::{CircuitBreaker, PostgresPool};
use signaling_relay::server::{create_app, AppState};
use signaling_relay::store::{create_capacity_store, PostgresCapacityStore};
use signaling_relay::tasks::SweeperTask;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!(backend = %settings.store.backend, "Configuration loaded");

    // Connect to PostgreSQL when it backs the capacity store
    let postgres_pool = if settings.store.backend == "postgres" {
        let breaker = Arc::new(CircuitBreaker::from_database(&settings.database));
        let pool = Arc::new(PostgresPool::new(&settings.database, breaker).await?);
        if settings.database.run_migrations {
            PostgresCapacityStore::new(pool.clone()).migrate().await?;
        }
        Some(pool)
    } else {
        None
    };

    let store = create_capacity_store(&settings.store, postgres_pool.clone());

    // Create application state
    let state = AppState::new(settings.clone(), store, postgres_pool.clone());
    tracing::info!("Application state initialized");
    let shutdown_signal = state.shutdown.clone();

    // Start room sweeper in background
    let sweeper_task = SweeperTask::new(
        settings.sweeper.clone(),
        state.store.clone(),
        shutdown_signal.subscribe(),
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper_task.run().await;
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_signal))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = sweeper_handle.await;

    if let Some(pool) = postgres_pool {
        pool.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Close live sessions and stop the sweeper
    let _ = shutdown_tx.send(());
}

//! doorman capacity server
//!
//! Serves capacity leases over HTTP and follows its resource configuration
//! as it changes on disk.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use doorman_server::{api, config, reload, state::AppState, CapacityServer};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DOORMAN_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let server_id = config.server_id();
    info!(server_id = %server_id, "Starting doorman");
    info!(
        listen_addr = %config.listen_addr,
        config_source = ?config.config_source,
        reload_trigger = ?config.reload_trigger,
        minimum_refresh_interval_secs = config.minimum_refresh_interval.as_secs(),
        wait_for_config = config.wait_for_config,
        "Configuration loaded"
    );

    let server = Arc::new(CapacityServer::new(server_id, config.server_settings()));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the config loop; the first document arrives asynchronously
    let source = config.config_source.open(config.reload_trigger)?;
    let mut config_handle = tokio::spawn(reload::run_config_loop(
        source,
        Arc::clone(&server),
        shutdown_rx.clone(),
    ));
    info!("Waiting for initial configuration");

    // Build and run the HTTP server
    let app = api::create_router(AppState::new(Arc::clone(&server), config.request_timeout));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C), a server exit, or a fatal config error
    let mut exit = Ok(());
    let mut config_running = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            result = &mut server_handle => {
                match result {
                    Ok(Ok(())) => info!("Server exited normally"),
                    Ok(Err(e)) => error!(error = %e, "Server error"),
                    Err(e) => error!(error = %e, "Server task panicked"),
                }
                break;
            }
            result = &mut config_handle, if config_running => {
                config_running = false;
                match result {
                    Ok(Ok(())) => info!("Config loop stopped, serving last configuration"),
                    Ok(Err(e)) => {
                        error!(error = %e, "Config loop failed");
                        exit = Err(e);
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Config loop panicked");
                        exit = Err(anyhow!("config loop panicked: {e}"));
                        break;
                    }
                }
            }
        }
    }

    // Signal shutdown and release anyone waiting for configuration
    let _ = shutdown_tx.send(true);
    server.close();

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if !server_handle.is_finished()
        && tokio::time::timeout(shutdown_timeout, server_handle).await.is_err()
    {
        warn!("HTTP server did not shut down in time");
    }

    if !config_handle.is_finished()
        && tokio::time::timeout(shutdown_timeout, config_handle).await.is_err()
    {
        warn!("Config loop did not shut down in time");
    }

    info!("Doorman shutdown complete");
    exit
}

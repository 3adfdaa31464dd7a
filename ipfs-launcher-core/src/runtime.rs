//! Async runtime for the launcher
//!
//! Starts the core, performs the initial load, serves the control API
//! and tears everything down again on Ctrl+C.

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use crate::api::create_router;
use crate::config::Config;
use crate::launcher::{Launcher, LauncherError, ResolveAndLoad};

/// Run the launcher with the given configuration
pub async fn run_node(config: Config) -> Result<(), LauncherError> {
    let launcher = Arc::new(Launcher::from_config(config)?);

    if let Err(e) = launcher.start().await {
        error!("Launch failed: {}", e);
        if let Err(stop_err) = launcher.shutdown().await {
            warn!("Cleanup after failed launch failed: {}", stop_err);
        }
        return Err(e);
    }

    let default_network = launcher.config().default_network.clone();
    match launcher.resolve_and_load(&default_network).await {
        Ok(url) => info!("Initial client ready at {}", url),
        // The UI can retry through the API
        Err(e) => warn!("Initial load of {} failed: {}", default_network, e),
    }

    let addr = format!("127.0.0.1:{}", launcher.config().api_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind control API on {}: {}", addr, e);
            launcher.shutdown().await?;
            return Err(e.into());
        }
    };
    info!("Control API listening on http://{}", addr);

    let router = create_router(Arc::clone(&launcher));
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C, shutting down...");
    });

    if let Err(e) = server.await {
        error!("Control API error: {}", e);
    }

    launcher.shutdown().await?;
    info!("Launcher exited");
    Ok(())
}

//! Daemon command: status server, startup verification, then the schedule loop.
//!
//! The status server comes up first so keep-alive probes succeed while the
//! startup verification is still running.

use std::sync::Arc;

use miette::Result;
use tokio::sync::watch;
use tracing::{error, info};

use crate::settings::Settings;

pub async fn run(settings: &Settings, port: u16) -> Result<()> {
    let scheduler = settings
        .build_scheduler()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    // Bind before anything runs so a taken port is a startup failure
    let listener = shortcast_web::bind(port)
        .await
        .map_err(|e| miette::miette!("failed to bind status server on port {}: {}", port, e))?;

    info!(
        schedule = %scheduler.config().describe(),
        steps = scheduler.executor().pipeline().len(),
        state = %settings.state_path().display(),
        "starting shortcast daemon"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    // Start the status server
    let web_handle = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown_rx = shutdown_rx.clone();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = shortcast_web::serve_on(listener, scheduler, shutdown_rx).await;
            if let Err(ref e) = result {
                error!(error = %e, port, "status server failed");
                let _ = shutdown_tx.send(true);
            }
            result
        })
    };

    if !*shutdown_rx.borrow() {
        scheduler.boot().await;
    }

    let loop_handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));
    let loop_result = loop_handle.await;
    if let Err(ref e) = loop_result {
        error!(error = %e, "scheduler loop panicked");
        let _ = shutdown_tx.send(true);
    }

    scheduler.wait_idle().await;
    match web_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(miette::miette!("status server failed: {}", e)),
        Err(e) => return Err(miette::miette!("status server task panicked: {}", e)),
    }
    loop_result.map_err(|e| miette::miette!("scheduler loop panicked: {}", e))?;

    info!("daemon stopped");
    Ok(())
}

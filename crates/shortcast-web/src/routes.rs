//! Web routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use shortcast_scheduler::Scheduler;

use crate::WebError;

/// Shared state for the web server.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// Create the web router.
pub fn create_router(scheduler: Arc<Scheduler>) -> Router {
    let state = Arc::new(AppState { scheduler });

    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/run", post(trigger_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the status server's listener on `0.0.0.0:port`.
pub async fn bind(port: u16) -> Result<TcpListener, WebError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    Ok(TcpListener::bind(addr).await?)
}

/// Serve on `0.0.0.0:port` until `shutdown` flips to true.
pub async fn serve(
    port: u16,
    scheduler: Arc<Scheduler>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), WebError> {
    serve_on(bind(port).await?, scheduler, shutdown).await
}

/// Serve on an already bound listener until `shutdown` flips to true.
pub async fn serve_on(
    listener: TcpListener,
    scheduler: Arc<Scheduler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WebError> {
    let addr = listener.local_addr()?;
    info!(%addr, "status server listening");

    axum::serve(listener, create_router(scheduler))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("status server stopped");
    Ok(())
}

/// Keep-alive probe. Always 200 so hosting platforms keep the instance up.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state.scheduler.executor().active();

    Json(json!({
        "status": if active.is_some() { "processing" } else { "alive" },
        "current_task": active.as_ref().and_then(|a| a.current_step()),
        "run_id": active.as_ref().map(|a| a.run_id),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn scheduler_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

async fn trigger_run(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, WebError> {
    let run_id = state.scheduler.trigger_manual()?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "status": "accepted" })),
    ))
}

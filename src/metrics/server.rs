//! HTTP surface for `GET /metrics` (Prometheus exposition) and
//! `GET /health` (spec §4.7). Runs on its own single-threaded Tokio runtime
//! so the rest of the daemon stays synchronous.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::metrics::Metrics;
use crate::metrics::health::{HealthMonitor, Status};

#[derive(Clone)]
struct ServerState {
    metrics: Arc<Metrics>,
    health: Arc<HealthMonitor>,
}

/// A running metrics/health HTTP server. Dropping this does not stop the
/// server; call [`MetricsServer::shutdown`] for a graceful stop.
pub struct MetricsServer {
    handle: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl MetricsServer {
    /// Bind and serve `/metrics` and `/health` on `addr` from a dedicated
    /// background thread running its own current-thread Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::errors::SsError::MetricsServerError`] if the
    /// listener cannot be bound.
    pub fn start(addr: SocketAddr, metrics: Arc<Metrics>, health: Arc<HealthMonitor>) -> crate::core::errors::Result<Self> {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(false));
        let alive_clone = Arc::clone(&alive);
        let shutdown_clone = Arc::clone(&shutdown_flag);

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<crate::core::errors::Result<()>>();

        let handle = thread::Builder::new()
            .name("ss-metrics-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_io().enable_time().build() {
                    Ok(rt) => rt,
                    Err(source) => {
                        let _ = ready_tx.send(Err(crate::core::errors::SsError::MetricsServerError {
                            details: format!("failed to build Tokio runtime: {source}"),
                        }));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let state = ServerState { metrics, health };
                    let app = build_router(state);

                    let listener = match tokio::net::TcpListener::bind(addr).await {
                        Ok(listener) => listener,
                        Err(source) => {
                            let _ = ready_tx.send(Err(crate::core::errors::SsError::MetricsServerError {
                                details: format!("failed to bind {addr}: {source}"),
                            }));
                            return;
                        }
                    };

                    alive_clone.store(true, Ordering::Relaxed);
                    let _ = ready_tx.send(Ok(()));

                    let shutdown_signal = async move {
                        while !shutdown_clone.load(Ordering::Relaxed) {
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    };

                    let _ = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await;
                    alive_clone.store(false, Ordering::Relaxed);
                });
            })
            .map_err(|source| crate::core::errors::SsError::MetricsServerError {
                details: format!("failed to spawn metrics server thread: {source}"),
            })?;

        ready_rx
            .recv()
            .map_err(|_| crate::core::errors::SsError::MetricsServerError {
                details: "metrics server thread exited before it could report readiness".to_string(),
            })??;

        Ok(Self {
            handle: Some(handle),
            shutdown_flag,
            alive,
        })
    }

    /// Whether the server's accept loop is currently running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Signal the server to stop accepting connections and wait for the
    /// background thread to exit, bounded by `timeout`.
    pub fn shutdown(mut self, timeout: std::time::Duration) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let start = std::time::Instant::now();
            while !handle.is_finished() && start.elapsed() < timeout {
                thread::sleep(std::time::Duration::from_millis(20));
            }
            let _ = handle.join();
        }
    }
}

fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.gather() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}

async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let status = state.health.status();
    let (code, label, healthy) = match status {
        Status::Healthy => (StatusCode::OK, "ok", true),
        Status::Degraded | Status::Down => (StatusCode::SERVICE_UNAVAILABLE, "degraded", false),
    };
    let body = serde_json::json!({ "status": label, "healthy": healthy }).to_string();
    (code, body)
}

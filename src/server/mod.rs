//! HTTP server
//!
//! The public listener serves `/turn` and ping; the admin listener serves
//! ping, `/health` and `/metrics`. When both addresses are equal a single
//! listener serves the merged routes.

mod router;

pub use router::{
    AppState, CorrelationId, MetricsRender, create_admin_router, create_combined_router,
    create_public_router,
};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::service::TurnRestService;
use crate::{Error, Result};

/// Listener addresses
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Public (credential) listener
    pub public_addr: SocketAddr,
    /// Admin (health/metrics) listener
    pub admin_addr: SocketAddr,
}

/// How often the uptime gauge is refreshed
const UPTIME_INTERVAL: Duration = Duration::from_millis(500);

/// Install the global Prometheus recorder and return a renderer for `/metrics`.
#[cfg(feature = "metrics")]
pub fn install_metrics_recorder() -> Option<MetricsRender> {
    match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let render: MetricsRender = Arc::new(move || handle.render());
            Some(render)
        }
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder, /metrics disabled");
            None
        }
    }
}

/// Metrics are compiled out.
#[cfg(not(feature = "metrics"))]
pub fn install_metrics_recorder() -> Option<MetricsRender> {
    None
}

/// Serve until Ctrl-C/SIGTERM or until the service's shutdown broadcast fires.
pub async fn run(
    service: Arc<TurnRestService>,
    config: ServerConfig,
    metrics: Option<MetricsRender>,
) -> Result<()> {
    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        metrics,
    });
    let shutdown_tx = service.shutdown_sender();
    tokio::spawn(shutdown_signal(shutdown_tx.clone()));
    tokio::spawn(record_uptime(Instant::now(), shutdown_tx.subscribe()));

    info!("============================================================");
    info!("TURN REST v{}", env!("CARGO_PKG_VERSION"));
    info!("============================================================");

    if config.public_addr == config.admin_addr {
        let listener = TcpListener::bind(config.public_addr).await?;
        info!(addr = %config.public_addr, "Listening (public + admin)");
        serve(listener, create_combined_router(state), shutdown_tx.subscribe()).await
    } else {
        let public = TcpListener::bind(config.public_addr).await?;
        let admin = TcpListener::bind(config.admin_addr).await?;
        info!(addr = %config.public_addr, "Listening (public)");
        info!(addr = %config.admin_addr, "Listening (admin)");
        let (public_result, admin_result) = tokio::join!(
            serve(public, create_public_router(Arc::clone(&state)), shutdown_tx.subscribe()),
            serve(admin, create_admin_router(state), shutdown_tx.subscribe()),
        );
        public_result.and(admin_result)
    }
}

/// Serve one listener with graceful shutdown on `shutdown`.
pub async fn serve(
    listener: TcpListener,
    app: axum::Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))
}

/// Keep `turn_rest_uptime_ms` current until shutdown.
async fn record_uptime(started: Instant, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(UPTIME_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                #[allow(clippy::cast_precision_loss)]
                let uptime_ms = started.elapsed().as_millis() as f64;
                telemetry_metrics::gauge!("turn_rest_uptime_ms").set(uptime_ms);
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

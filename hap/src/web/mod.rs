//! Status API and Prometheus metrics server.
//!
//! This module provides a small JSON status endpoint for monitoring the bridge
//! and a Prometheus metrics endpoint for external monitoring.

pub mod metrics;
pub mod state;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::settings::WebSettings;
use crate::web::metrics::Metrics;
use crate::web::state::BridgeState;

/// Application state shared with all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bridge state.
    pub bridge_state: BridgeState,
    /// Prometheus metrics handle.
    pub metrics_handle: PrometheusHandle,
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(api_status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the web server.
///
/// This function spawns the web server in the background and returns immediately.
/// The server stops when `cancel` fires.
pub async fn start_web_server(
    config: &WebSettings,
    bridge_state: BridgeState,
    metrics_handle: PrometheusHandle,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    if !config.enabled {
        info!("Web server is disabled");
        return Ok(());
    }

    let app = router(AppState {
        bridge_state,
        metrics_handle,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting web server on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;

    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Web server error: {}", e);
        }
    });

    Ok(())
}

/// Health check endpoint.
async fn health_handler(State(state): State<AppState>) -> Response {
    if state.bridge_state.is_healthy() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY").into_response()
    }
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    // Update uptime metric before rendering
    Metrics::set_uptime(state.bridge_state.start_time());

    let metrics = state.metrics_handle.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics,
    )
        .into_response()
}

/// API status endpoint - returns JSON status.
async fn api_status_handler(State(state): State<AppState>) -> Response {
    let summary = state.bridge_state.summary();
    let effective_target = summary
        .device_state
        .as_ref()
        .and_then(|s| s.effective_target_temperature());

    let json = serde_json::json!({
        "status": if state.bridge_state.is_healthy() { "ok" } else { "degraded" },
        "uptime_seconds": summary.uptime_seconds,
        "uptime": summary.uptime_display(),
        "bootstrap": summary.bootstrap_state.as_str(),
        "listening": summary.listening,
        "pairing": {
            "pin": summary.pairing_pin,
            "url": summary.pairing_url,
        },
        "device": summary.device.as_ref().map(|d| serde_json::json!({
            "name": d.name,
            "type": d.device_type,
            "display_name": d.display_name(),
        })),
        "state": summary.device_state,
        "effective_target_temperature": effective_target,
        "messages": {
            "acked": summary.messages.acked(),
            "nacked": summary.messages.nacked(),
            "malformed": summary.messages.malformed,
            "rejected": summary.messages.rejected,
            "skipped": summary.messages.skipped,
            "changes": summary.messages.changes,
            "last_seconds_ago": summary.last_message_seconds_ago,
        },
        "receive_failures": summary.receive_failures,
        "commands": {
            "sent": summary.commands_sent,
            "failed": summary.commands_failed,
        },
        "last_error": summary.last_error,
    });

    (
        StatusCode::OK,
        [("content-type", "application/json")],
        json.to_string(),
    )
        .into_response()
}

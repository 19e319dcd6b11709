//! Axum-based HTTP server.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handlers;
use crate::state::GatewayState;

/// Build the API router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let gateway = state.config.gateway_config();

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/transcribe", post(handlers::transcribe))
        .route("/api/plan", post(handlers::plan))
        .route("/api/symbols/search", post(handlers::search_symbols))
        .route("/api/symbols/filter", post(handlers::filter_symbols))
        .route("/api/interpret", post(handlers::interpret))
        .route("/api/speak", post(handlers::speak))
        .route("/api/suggest", post(handlers::suggest))
        .with_state(state);

    #[cfg(feature = "metrics")]
    let app = app.layer(axum::middleware::from_fn(crate::metrics::track));

    app.layer(DefaultBodyLimit::max(gateway.max_upload_bytes))
        .layer(cors_layer(&gateway.cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state
        .config
        .gateway
        .as_ref()
        .and_then(|g| g.bind.clone())
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let app = router(state);

    #[cfg(feature = "metrics")]
    let app = match crate::metrics::install_prometheus_recorder() {
        Ok(handle) => app.route("/metrics", get(move || async move { handle.render() })),
        Err(e) => {
            warn!(%e, "Prometheus recorder unavailable, /metrics disabled");
            app
        }
    };

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

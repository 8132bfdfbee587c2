pub mod config;
pub mod metrics;
mod routes;
mod state;

use std::process;
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tracing::{error, info};

use self::config::SplitcacheConfig;
use self::metrics::{handle_metrics, record_error, record_update, track_metrics};
use self::routes::{handle_health, handle_preload, handle_preload_js, handle_preload_json};
use self::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/preload", get(handle_preload))
        .route("/preload.js", get(handle_preload_js))
        .route("/preload.json", get(handle_preload_json))
        .route("/metrics", get(handle_metrics))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(CompressionLayer::new())
        .with_state(state)
}

pub async fn run_serve(config: SplitcacheConfig, port_arg: Option<u16>, hostname_arg: Option<String>) {
    let port = port_arg.unwrap_or(config.server.port);
    let hostname = hostname_arg.unwrap_or(config.server.hostname);

    let poller = splitcache_lib::init()
        .config(config.split)
        .on_updated(record_update)
        .on_error(record_error)
        .build()
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to create poller");
            process::exit(1);
        });

    // The first sync completes before the server accepts requests.
    if let Err(e) = poller.start().await {
        error!(error = %e, "failed to start poller");
        process::exit(1);
    }

    let state = Arc::new(AppState::new(poller.clone()));
    let app = router(state);

    let addr = format!("{}:{}", hostname, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(addr = %addr, error = %e, "failed to bind");
            process::exit(1);
        });
    info!("serving preload scripts on http://{}", addr);

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }

        #[cfg(not(unix))]
        ctrl_c.await.ok();

        info!("shutdown signal received, finishing in-flight requests");
    };

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    poller.stop();

    if let Err(e) = served {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("server stopped");
}

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusHandle};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::listener::{Listener, ListenerError};
use crate::storage::{AbortedCheckStore, RedisStore, RemoteError, StorageError};
use crate::stream::Broadcaster;

use super::api::checks as check_handlers;
use super::api::stream as stream_handlers;
use super::api_doc::ApiDoc;
use super::config::Config;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] BuildError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AbortedCheckStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/stream", get(stream_handlers::subscribe))
        .route("/checks", get(check_handlers::list_checks))
        .route("/abort", post(check_handlers::abort_checks))
        .route("/status", get(check_handlers::status))
        .route("/metrics", get(check_handlers::render_metrics))
        // OpenAPI / Swagger
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<(), ServerError> {
    let metrics = crate::metrics::install_recorder()?;

    let remote = RedisStore::connect(&config.redis.url, config.store.ttl).await?;
    let store = AbortedCheckStore::new(Arc::new(remote), config.store.refresh_period).await?;

    let broadcaster = Broadcaster::new(
        config.stream.ping_interval,
        config.stream.buffer,
        config.stream.max_dropped,
    );
    broadcaster.start();

    if let Some(ref listener_config) = config.listener {
        let listener = Listener::connect(listener_config, broadcaster.clone()).await?;
        tokio::spawn(listener.run());
    }

    let state = AppState {
        store,
        broadcaster,
        metrics: Some(metrics),
    };
    let app = router(state);

    log::info!("Starting server on {}", config.web.bind);

    let tcp = tokio::net::TcpListener::bind(&config.web.bind).await?;
    axum::serve(tcp, app).await?;
    Ok(())
}

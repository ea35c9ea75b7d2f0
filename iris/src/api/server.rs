use crate::config::ServerConfig;
use crate::coordinator::PredictionCoordinator;
use crate::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: PredictionCoordinator,
    pub upload_dir: Arc<PathBuf>,
    pub metrics: Option<PrometheusHandle>,
}

pub struct ApiServer {
    coordinator: PredictionCoordinator,
    config: ServerConfig,
    upload_dir: PathBuf,
    metrics: Option<PrometheusHandle>,
}

impl ApiServer {
    pub fn new(coordinator: PredictionCoordinator, upload_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(coordinator, ServerConfig::default(), upload_dir)
    }

    pub fn with_config(
        coordinator: PredictionCoordinator,
        config: ServerConfig,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            config,
            upload_dir: upload_dir.into(),
            metrics: None,
        }
    }

    /// Expose the given Prometheus recorder at GET /metrics
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build CORS layer from configuration
    fn build_cors_layer(&self) -> CorsLayer {
        if !self.config.cors.enabled {
            return CorsLayer::new();
        }

        let origins: Vec<HeaderValue> = self
            .config
            .cors
            .origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| o.parse().ok())
            .collect();

        let has_wildcard = self.config.cors.origins.iter().any(|o| o == "*");

        let cors = if has_wildcard {
            CorsLayer::new().allow_origin(tower_http::cors::Any)
        } else if origins.is_empty() {
            CorsLayer::new()
        } else {
            CorsLayer::new().allow_origin(origins)
        };

        cors.allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: self.coordinator.clone(),
            upload_dir: Arc::new(self.upload_dir.clone()),
            metrics: self.metrics.clone(),
        };

        let api_routes = Router::new()
            .route("/predict", post(crate::api::routes::predict))
            // Route name used by the first version of the web page
            .route("/train", post(crate::api::routes::predict))
            .route("/upload", post(crate::api::upload::upload_model))
            .route("/model", get(crate::api::routes::get_model))
            .route("/stats/cache", get(crate::api::routes::get_cache_stats))
            .route("/health", get(crate::api::routes::health))
            .route("/metrics", get(crate::api::routes::metrics))
            .with_state(state);

        let static_dir = &self.config.static_dir;
        let static_routes = Router::new()
            .route_service("/", ServeFile::new(static_dir.join("index.html")))
            .nest_service("/static", ServeDir::new(static_dir));

        Router::new()
            .merge(static_routes)
            .merge(api_routes)
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .layer(middleware::from_fn(crate::api::telemetry::track_requests))
            .layer(self.build_cors_layer())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| crate::Error::Server(e.to_string()))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

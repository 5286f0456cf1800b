//! HTTP API server with observability for the topup gateway.
//!
//! Exposes the create and update topup sagas and a cached topup read over
//! REST, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use topup::{
    InMemoryTopupCache, NotificationPublisher, OrchestratorConfig, SagaMetrics,
    TopupOrchestrator, TopupQuery,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::topups::{AppState, Ledger};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: Ledger, P: NotificationPublisher + 'static>(
    state: Arc<AppState<L, P>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/topups", post(routes::topups::create::<L, P>))
        .route(
            "/topups/{id}",
            get(routes::topups::get::<L, P>).put(routes::topups::update::<L, P>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the orchestrator and the query side over one ledger and one cache.
///
/// Metric handles are taken from the recorder installed at call time.
pub fn create_default_state<L: Ledger, P: NotificationPublisher + 'static>(
    ledger: L,
    publisher: P,
    config: OrchestratorConfig,
) -> Arc<AppState<L, P>> {
    let cache = InMemoryTopupCache::new();
    let query = TopupQuery::new(ledger.clone(), cache.clone(), config.cache_ttl);
    let orchestrator = TopupOrchestrator::new(
        ledger.clone(),
        ledger.clone(),
        ledger,
        publisher,
        cache,
    )
    .with_config(config)
    .with_metrics(SagaMetrics::register());

    Arc::new(AppState {
        orchestrator,
        query,
    })
}

//! habitat-broker-api — Open Service Broker v2 over HTTP.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v2/catalog` | Offered services and plans |
//! | PUT | `/v2/service_instances/{instance_id}` | Provision |
//! | PATCH | `/v2/service_instances/{instance_id}` | Update (acknowledged only) |
//! | DELETE | `/v2/service_instances/{instance_id}` | Deprovision |
//! | GET | `/v2/service_instances/{instance_id}/last_operation` | Always 501 |
//! | PUT | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | Bind |
//! | DELETE | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | Unbind |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |
//!
//! Every `/v2` route requires an `X-Broker-API-Version` header with major
//! version 2.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod version;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, put};
use habitat_broker_lifecycle::LifecycleManager;
use tokio_util::sync::CancellationToken;

pub use error::ApiError;
pub use metrics::BrokerMetrics;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<LifecycleManager>,
    pub metrics: Arc<BrokerMetrics>,
    /// Parent of every per-request cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(manager: Arc<LifecycleManager>, shutdown: CancellationToken) -> Self {
        Self {
            manager,
            metrics: Arc::new(BrokerMetrics::new()),
            shutdown,
        }
    }
}

/// Build the complete router (broker routes + metrics + health).
pub fn build_router(state: ApiState) -> Router {
    let broker_routes = Router::new()
        .route("/catalog", get(handlers::get_catalog))
        .route(
            "/service_instances/{instance_id}",
            put(handlers::provision)
                .patch(handlers::update)
                .delete(handlers::deprovision),
        )
        .route(
            "/service_instances/{instance_id}/last_operation",
            get(handlers::last_operation),
        )
        .route(
            "/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(handlers::bind).delete(handlers::unbind),
        )
        .layer(axum::middleware::from_fn(version::require_api_version))
        .with_state(state.clone());

    Router::new()
        .nest("/v2", broker_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
        .route("/healthz", get(handlers::healthz))
}

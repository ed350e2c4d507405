// Quota Gateway - HTTP surface over the quota ledger for tool controllers
pub mod config;
pub mod error;
mod handlers;
pub mod types;

use axum::{
    routing::{get, post, put},
    Router,
};
use quota_ledger::QuotaLedger;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<QuotaLedger>,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(ledger: Arc<QuotaLedger>) -> Self {
        Self {
            ledger,
            metrics: Arc::new(ServerMetrics::default()),
        }
    }
}

// Metrics tracking
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub total_requests: AtomicU64,
    pub checks: AtomicU64,
    pub denials: AtomicU64,
    pub consumes: AtomicU64,
    pub units_from_plan: AtomicU64,
    pub units_from_credits: AtomicU64,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Catalog and account lifecycle
        .route("/api/v1/plans", get(handlers::list_plans))
        .route("/api/v1/accounts", post(handlers::open_account))
        .route("/api/v1/accounts/:id/usage", get(handlers::usage_stats))
        .route("/api/v1/accounts/:id/plan", put(handlers::change_plan))
        .route(
            "/api/v1/accounts/:id/subscription",
            put(handlers::set_subscription),
        )
        .route("/api/v1/accounts/:id/credits", post(handlers::purchase_credits))

        // Admission
        .route("/api/v1/accounts/:id/check", post(handlers::check))
        .route("/api/v1/accounts/:id/feature", post(handlers::check_feature))

        // Ledger mutations
        .route("/api/v1/accounts/:id/consume", post(handlers::consume))
        .route(
            "/api/v1/accounts/:id/consume/batch",
            post(handlers::consume_batch),
        )
        .route("/api/v1/accounts/:id/reservations", post(handlers::reserve))
        .route(
            "/api/v1/accounts/:id/reservations/:rid/commit",
            post(handlers::commit),
        )
        .route(
            "/api/v1/accounts/:id/reservations/:rid/refund",
            post(handlers::refund),
        )

        // Metrics and monitoring
        .route("/api/v1/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health))

        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

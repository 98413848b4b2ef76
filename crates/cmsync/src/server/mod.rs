//! Axum router for `cmsync serve`.
//!
//! - `/health` and `/api/webhook/cms` are open; the webhook checks its own
//!   HMAC signature when a secret is configured.
//! - Everything else under `/api` requires HTTP Basic auth.

pub mod api;
pub mod auth;
pub mod error;
pub mod jobs;
pub mod webhook;

use std::sync::Arc;

use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::{Router, middleware};
use secrecy::SecretString;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use cmsync_core::SyncService;

pub use auth::BasicCredentials;
pub use error::{AppError, AppResult};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: SyncService,
    /// `None` refuses every authenticated route.
    pub credentials: Option<Arc<BasicCredentials>>,
    pub webhook_secret: Option<Arc<SecretString>>,
}

impl AppState {
    pub fn new(
        service: SyncService,
        credentials: Option<BasicCredentials>,
        webhook_secret: Option<SecretString>,
    ) -> Self {
        Self {
            service,
            credentials: credentials.map(Arc::new),
            webhook_secret: webhook_secret.map(Arc::new),
        }
    }
}

/// Build the full application [`Router`] with all middleware layers.
///
/// Layers apply bottom-up: request id, tracing, request id propagation,
/// panic recovery.
pub fn build_router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    let api = Router::new()
        .route("/status", get(api::status))
        .route("/history", get(api::history))
        .route("/models", get(api::models))
        .route("/test", get(api::test_connections))
        .route("/catalog/datasets", get(api::catalog_datasets))
        .route(
            "/catalog/datasets/{dataset_id}/resources",
            get(api::catalog_resources),
        )
        .route("/sync", post(api::sync))
        .route("/sync/flexible", post(api::sync_flexible))
        .route("/jobs", get(jobs::list).post(jobs::create))
        .route(
            "/jobs/{job_id}",
            get(jobs::show).put(jobs::update).delete(jobs::delete),
        )
        .route("/jobs/{job_id}/run", post(jobs::run))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ));

    Router::new()
        .route("/health", get(api::health))
        .route(
            webhook::WEBHOOK_PATH,
            get(webhook::verify).post(webhook::receive),
        )
        .nest("/api", api)
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}

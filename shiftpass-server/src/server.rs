//! Axum router setup.

use crate::config::ServerConfig;
use crate::handlers::{attendance, employee, registration, workplaces};
use crate::replay::ReplayCache;
use crate::storage::Storage;
use crate::verifier::Verifier;
use axum::routing::{get, post};
use axum::Router;
use shiftpass_core::protocol::paths;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub verifier: Verifier,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(storage: Storage, config: ServerConfig) -> Self {
        Self {
            storage,
            verifier: Verifier::new(ReplayCache::new(config.replay_window_secs)),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_payload_size = state.config.max_payload_size;

    Router::new()
        .route(
            &format!("{}/{{token_id}}", paths::REGISTRATION),
            get(registration::fetch_registration),
        )
        .route(paths::REGISTRATION, post(registration::register))
        .route(paths::ATTENDANCE, post(attendance::check_in_out))
        .route(
            paths::ATTENDANCE_LOCAL_DEVICE,
            post(attendance::confirm_local_device),
        )
        .route(paths::BREAK, post(attendance::take_break))
        .route(paths::PAUSE, post(attendance::pause))
        .route(paths::SPECIFIC_BREAK, post(attendance::specific_break))
        .route(paths::ATTENDANCES, get(attendance::history))
        .route(
            &format!("{}/{{retail_id}}", paths::ATTENDANCES),
            get(attendance::history_for_retail),
        )
        .route(paths::WORKPLACES, post(workplaces::workplaces))
        .route(paths::EMPLOYEE_ME, get(employee::me))
        .route(paths::CANCEL_PAIRING, post(employee::cancel_pairing))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

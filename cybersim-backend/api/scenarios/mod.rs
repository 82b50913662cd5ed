pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scenarios", get(handlers::list_scenarios))
        .route("/scenarios/{id}", get(handlers::get_scenario))
        .route("/scenarios/{id}/run", post(handlers::run_scenario))
        .route("/scenarios/{id}/runs", get(handlers::get_runs))
}

pub mod handlers;

use axum::Router;
use axum::routing::get;

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs/{id}", get(handlers::get_run))
        .route("/stats", get(handlers::get_stats))
}

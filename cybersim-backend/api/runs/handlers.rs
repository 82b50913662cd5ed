use axum::Json;
use axum::extract::{Path, State};
use hyper::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};

use crate::api::AppState;
use crate::runs::{RunError, RunStats};

pub(crate) fn run_error_response(err: RunError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        RunError::NotFound(_) => StatusCode::NOT_FOUND,
        RunError::EmptyCommand => StatusCode::UNPROCESSABLE_ENTITY,
        RunError::AlreadyRunning(_)
        | RunError::InvalidTransition { .. }
        | RunError::Finalized(_) => StatusCode::CONFLICT,
        RunError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

pub(crate) async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let run = state.run_repo.get_run(&id).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Run not found" })),
        )
    })?;
    Ok(Json(json!(run)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsResponse {
    total_scenarios: usize,
    #[serde(flatten)]
    runs: RunStats,
}

pub(crate) async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let total_scenarios = state.scenario_repo.list_scenarios().await.len();
    let runs = state.run_repo.stats().await;
    Json(StatsResponse {
        total_scenarios,
        runs,
    })
}

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::AppState;
use crate::api::runs::handlers::run_error_response;

const DEFAULT_RUNS_LIMIT: usize = 10;
const DEFAULT_USER: &str = "anonymous";

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn scenario_not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Scenario not found" })),
    )
}

pub(crate) async fn list_scenarios(State(state): State<AppState>) -> Json<Value> {
    let scenarios = state.scenario_repo.list_scenarios().await;
    Json(json!(scenarios))
}

pub(crate) async fn get_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let scenario = state
        .scenario_repo
        .get_scenario(&id)
        .await
        .ok_or_else(scenario_not_found)?;
    Ok(Json(json!(scenario)))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    #[serde(default)]
    user_id: Option<String>,
}

/// Start a run of the scenario's command. The body is optional; when present
/// it may carry the requesting `userId`.
pub(crate) async fn run_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid request body: {e}") })),
            )
        })?
    };

    let scenario = state
        .scenario_repo
        .get_scenario(&id)
        .await
        .ok_or_else(scenario_not_found)?;

    let user_id = request
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string());

    let run = state
        .supervisor
        .launch(&scenario.id, &user_id, &scenario.exec_command)
        .await
        .map_err(|e| {
            tracing::error!(scenario_id = %scenario.id, error = %e, "failed to start run");
            run_error_response(e)
        })?;

    tracing::info!(scenario_id = %scenario.id, run_id = %run.id, user_id = %user_id, "run started");
    Ok(Json(json!({ "runId": run.id })))
}

#[derive(Deserialize)]
pub(crate) struct RunsQuery {
    limit: Option<usize>,
}

pub(crate) async fn get_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResult {
    if state.scenario_repo.get_scenario(&id).await.is_none() {
        return Err(scenario_not_found());
    }
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    let runs = state.run_repo.list_runs(&id, limit).await;
    Ok(Json(json!(runs)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::test_support::{TestServer, spawn_server};
    use crate::runs::RunStatus;

    const HELLO: (&str, &str) = (
        "hello",
        "name: Hello\ndescription: prints a greeting\ntarget_apps: [shell]\nexec_command: echo hello\n",
    );

    async fn get(server: &TestServer, path: &str) -> (StatusCode, Value) {
        let response = reqwest::get(format!("http://{}{}", server.addr, path))
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn post(server: &TestServer, path: &str, body: &str) -> (StatusCode, Value) {
        let response = reqwest::Client::new()
            .post(format!("http://{}{}", server.addr, path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_list_and_get_scenarios() {
        let server = spawn_server(&[HELLO]).await;

        let (status, body) = get(&server, "/api/scenarios").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "hello");
        assert_eq!(body[0]["execCommand"], "echo hello");
        assert_eq!(body[0]["targetApps"][0], "shell");

        let (status, body) = get(&server, "/api/scenarios/hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Hello");

        let (status, body) = get(&server, "/api/scenarios/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Scenario not found");
    }

    #[tokio::test]
    async fn test_run_scenario_returns_run_id_and_completes() {
        let server = spawn_server(&[HELLO]).await;

        let (status, body) = post(&server, "/api/scenarios/hello/run", "").await;
        assert_eq!(status, StatusCode::OK);
        let run_id = body["runId"].as_str().unwrap().to_string();

        let store = &server.state.run_repo;
        let mut run = store.get_run(&run_id).await.unwrap();
        for _ in 0..100 {
            if run.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            run = store.get_run(&run_id).await.unwrap();
        }
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.user_id, "anonymous");
        assert!(run.output.contains("hello"));

        let (status, body) = get(&server, "/api/scenarios/hello/runs?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], run_id.as_str());
    }

    #[tokio::test]
    async fn test_run_scenario_records_user_id() {
        let server = spawn_server(&[HELLO]).await;

        let (_, body) = post(&server, "/api/scenarios/hello/run", r#"{"userId":"alice"}"#).await;
        let run = server
            .state
            .run_repo
            .get_run(body["runId"].as_str().unwrap())
            .await
            .unwrap();
        assert_eq!(run.user_id, "alice");
    }

    #[tokio::test]
    async fn test_run_scenario_rejects_bad_body_and_unknown_scenario() {
        let server = spawn_server(&[HELLO]).await;

        let (status, _) = post(&server, "/api/scenarios/hello/run", "{nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(&server, "/api/scenarios/missing/run", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Scenario not found");
        assert!(server.state.run_repo.list_runs("missing", 10).await.is_empty());
    }
}

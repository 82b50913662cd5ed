pub mod live;
pub mod middleware;
mod routes;
pub mod runs;
pub mod scenarios;

use axum::Router;
use std::sync::Arc;

use crate::runs::hub::BroadcastHub;
use crate::runs::repository::RunRepository;
use crate::runs::supervisor::RunSupervisor;
use crate::scenarios::repository::ScenarioRepository;

#[derive(Clone)]
pub struct AppState {
    pub run_repo: Arc<dyn RunRepository>,
    pub scenario_repo: Arc<dyn ScenarioRepository>,
    /// Fan-out of live run output to connected viewers.
    pub hub: Arc<BroadcastHub>,
    pub supervisor: Arc<RunSupervisor>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}

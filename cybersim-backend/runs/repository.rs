use anyhow::Result;
use async_trait::async_trait;

use super::{Run, RunError, RunStats, RunUpdate};

/// Durable record of runs. Implementations enforce the status state machine
/// and reject output changes once a run is terminal.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Create a run in `pending` status.
    async fn create_run(&self, scenario_id: &str, user_id: &str) -> Result<Run, RunError>;
    async fn get_run(&self, id: &str) -> Option<Run>;
    async fn update_run(&self, id: &str, update: RunUpdate) -> Result<Run, RunError>;
    /// Append a chunk to the accumulated output. Returns the output length in
    /// bytes after the append.
    async fn append_output(&self, id: &str, chunk: &str) -> Result<usize, RunError>;
    /// Runs for a scenario, newest first.
    async fn list_runs(&self, scenario_id: &str, limit: usize) -> Vec<Run>;
    async fn stats(&self) -> RunStats;
    async fn load_all(&self) -> Result<()>;
}

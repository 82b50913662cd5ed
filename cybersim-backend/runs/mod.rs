pub mod decode;
pub mod file_repository;
pub mod hub;
pub mod repository;
pub mod supervisor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Forward-only state machine: `pending -> running -> {success, failed}`.
    /// Re-asserting a non-terminal status is allowed (idempotent update).
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Pending | RunStatus::Running) => true,
            (RunStatus::Running, RunStatus::Running | RunStatus::Success | RunStatus::Failed) => {
                true
            }
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of a scenario's command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub scenario_id: String,
    pub user_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds between start and the terminal transition.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub output: String,
}

impl Run {
    pub fn new(scenario_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scenario_id: scenario_id.into(),
            user_id: user_id.into(),
            status: RunStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            output: String::new(),
        }
    }

    /// Apply an update in place, enforcing the state machine and output immutability.
    pub fn apply(&mut self, update: RunUpdate) -> Result<(), RunError> {
        if !self.status.can_transition_to(update.status) {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to: update.status,
            });
        }
        self.status = update.status;
        if let Some(end_time) = update.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(duration) = update.duration {
            self.duration = Some(duration);
        }
        if let Some(output) = update.output {
            self.output = output;
        }
        Ok(())
    }
}

/// Partial update accepted by the run store. `output`, when present,
/// replaces the accumulated output (last write wins).
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
    pub output: Option<String>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status,
            end_time: None,
            duration: None,
            output: None,
        }
    }

    pub fn terminal(status: RunStatus, end_time: DateTime<Utc>, duration: u64) -> Self {
        Self {
            status,
            end_time: Some(end_time),
            duration: Some(duration),
            output: None,
        }
    }
}

/// Aggregate counters over the run store.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub running_runs: usize,
    pub last_run_time: Option<DateTime<Utc>>,
}

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("run not found: {0}")]
    NotFound(String),

    #[error("empty command")]
    EmptyCommand,

    #[error("run {0} is already running")]
    AlreadyRunning(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("run {0} is finalized; output is immutable")]
    Finalized(String),

    #[error("store: {0}")]
    Store(#[from] anyhow::Error),
}

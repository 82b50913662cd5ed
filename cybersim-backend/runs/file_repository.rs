use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::repository::RunRepository;
use super::{Run, RunError, RunStats, RunStatus, RunUpdate};

const RESTART_NOTICE: &str = "[ERROR] Server restarted before the run completed\n";

/// Run store backed by one JSON file per run under `<base_dir>/runs/`.
///
/// The in-memory map is authoritative for reads. Each run sits behind its own
/// lock; the map itself is only write-locked to add runs, so appends and
/// flushes of one run never wait on another. Output appends stay in memory
/// until the next status update flushes the record; updates are applied to a
/// copy and only committed once the file write succeeded, so a failed flush
/// leaves the previous state intact for a retry.
pub struct FileRunRepository {
    base_dir: PathBuf,
    runs: RwLock<HashMap<String, Arc<Mutex<Run>>>>,
}

impl FileRunRepository {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    fn run_file(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Run>>, RunError> {
        self.runs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RunError::NotFound(id.to_string()))
    }

    /// Snapshot of every record, taken one run lock at a time.
    async fn snapshot(&self) -> Vec<Run> {
        let entries: Vec<Arc<Mutex<Run>>> = self.runs.read().await.values().cloned().collect();
        let mut runs = Vec::with_capacity(entries.len());
        for entry in entries {
            runs.push(entry.lock().await.clone());
        }
        runs
    }

    /// Atomic write via temp file + rename.
    async fn flush_run(&self, run: &Run) -> Result<()> {
        let content = serde_json::to_string_pretty(run).context("failed to serialize run")?;
        let dir = self.runs_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create runs dir: {}", dir.display()))?;
        let path = self.run_file(&run.id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("failed to write run file: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to rename run file: {}", path.display()))?;
        Ok(())
    }

    /// Close out a run a previous process left unfinished.
    fn recover_stale(run: &mut Run) {
        if !run.output.is_empty() && !run.output.ends_with('\n') {
            run.output.push('\n');
        }
        run.output.push_str(RESTART_NOTICE);
        let now = Utc::now();
        run.status = RunStatus::Failed;
        run.end_time = Some(now);
        run.duration = Some((now - run.start_time).num_seconds().max(0) as u64);
    }
}

#[async_trait]
impl RunRepository for FileRunRepository {
    async fn create_run(&self, scenario_id: &str, user_id: &str) -> Result<Run, RunError> {
        let run = Run::new(scenario_id, user_id);
        self.flush_run(&run).await?;
        self.runs
            .write()
            .await
            .insert(run.id.clone(), Arc::new(Mutex::new(run.clone())));
        Ok(run)
    }

    async fn get_run(&self, id: &str) -> Option<Run> {
        let entry = self.entry(id).await.ok()?;
        let run = entry.lock().await.clone();
        Some(run)
    }

    async fn update_run(&self, id: &str, update: RunUpdate) -> Result<Run, RunError> {
        let entry = self.entry(id).await?;
        let mut current = entry.lock().await;

        let mut next = current.clone();
        next.apply(update)?;
        self.flush_run(&next).await?;
        *current = next.clone();
        Ok(next)
    }

    async fn append_output(&self, id: &str, chunk: &str) -> Result<usize, RunError> {
        let entry = self.entry(id).await?;
        let mut run = entry.lock().await;
        if run.status.is_terminal() {
            return Err(RunError::Finalized(id.to_string()));
        }
        run.output.push_str(chunk);
        Ok(run.output.len())
    }

    async fn list_runs(&self, scenario_id: &str, limit: usize) -> Vec<Run> {
        let mut matching: Vec<Run> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.scenario_id == scenario_id)
            .collect();
        matching.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        matching.truncate(limit);
        matching
    }

    async fn stats(&self) -> RunStats {
        let mut stats = RunStats::default();
        for run in self.snapshot().await {
            match run.status {
                RunStatus::Success => stats.successful_runs += 1,
                RunStatus::Failed => stats.failed_runs += 1,
                RunStatus::Running => stats.running_runs += 1,
                RunStatus::Pending => {}
            }
            if stats.last_run_time.is_none_or(|t| run.start_time > t) {
                stats.last_run_time = Some(run.start_time);
            }
        }
        stats
    }

    async fn load_all(&self) -> Result<()> {
        let runs_dir = self.runs_dir();
        std::fs::create_dir_all(&runs_dir)
            .with_context(|| format!("failed to create runs dir: {}", runs_dir.display()))?;

        let mut loaded_runs = HashMap::new();
        let entries = std::fs::read_dir(&runs_dir)
            .with_context(|| format!("failed to read runs dir: {}", runs_dir.display()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read run file: {}", path.display()))?;
            let mut run = match serde_json::from_str::<Run>(&content) {
                Ok(run) => run,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid run file");
                    continue;
                }
            };

            if !run.status.is_terminal() {
                tracing::warn!(run_id = %run.id, status = %run.status, "Marking unfinished run as failed");
                Self::recover_stale(&mut run);
                if let Err(e) = self.flush_run(&run).await {
                    tracing::error!(run_id = %run.id, error = %e, "Failed to persist recovered run");
                }
            }

            loaded_runs.insert(run.id.clone(), Arc::new(Mutex::new(run)));
        }

        let run_count = loaded_runs.len();
        if run_count > 0 {
            tracing::info!(count = run_count, "Loaded runs");
        }
        *self.runs.write().await = loaded_runs;

        Ok(())
    }
}

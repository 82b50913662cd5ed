use std::sync::Arc;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};

use crate::scenarios::file_repository::{FileScenarioRepository, is_definition_file};

/// Watches the scenarios directory for external edits and keeps the
/// in-memory catalog in sync.
pub struct ScenarioWatcher {
    /// Dropping the debouncer stops the watcher.
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl ScenarioWatcher {
    pub fn start(repo: Arc<FileScenarioRepository>) -> anyhow::Result<Self> {
        let dir = repo.dir().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let rt = tokio::runtime::Handle::current();

        let mut debouncer = new_debouncer(
            std::time::Duration::from_millis(500),
            move |events: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "scenario watcher error");
                        return;
                    }
                };

                for event in events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }

                    let filename = match event.path.file_name().and_then(|f| f.to_str()) {
                        Some(f) if is_definition_file(f) => f.to_string(),
                        _ => continue,
                    };

                    let repo = repo.clone();
                    let path = event.path.clone();

                    rt.spawn(async move {
                        let (change, scenario_id) = if path.exists() {
                            match repo.reload_file(&filename).await {
                                Some(id) => ("updated", id),
                                None => return,
                            }
                        } else {
                            match repo.evict_file(&filename).await {
                                Some(id) => ("deleted", id),
                                None => return,
                            }
                        };
                        tracing::info!(change, scenario_id = %scenario_id, "scenario definition changed");
                    });
                }
            },
        )?;

        use notify::RecursiveMode;
        debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %dir.display(), "scenario watcher started");

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

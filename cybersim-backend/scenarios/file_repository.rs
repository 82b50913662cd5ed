use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::repository::ScenarioRepository;
use super::{Scenario, ScenarioDefinition};

pub struct FileScenarioRepository {
    dir: PathBuf,
    scenarios: RwLock<HashMap<String, Scenario>>,
}

pub(crate) fn is_definition_file(filename: &str) -> bool {
    filename.ends_with(".yaml") || filename.ends_with(".yml")
}

fn scenario_id(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(String::from)
}

impl FileScenarioRepository {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            scenarios: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn parse_file(path: &Path) -> Result<Scenario> {
        let id = scenario_id(path).context("scenario file has no usable name")?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file: {}", path.display()))?;
        let definition: ScenarioDefinition = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse scenario file: {}", path.display()))?;
        if !definition.is_valid() {
            bail!("missing required fields (name, exec_command)");
        }
        Ok(definition.into_scenario(id, path.display().to_string()))
    }

    /// Re-read a single definition after an external change.
    /// Returns the scenario id when the file parsed.
    pub async fn reload_file(&self, filename: &str) -> Option<String> {
        let path = self.dir.join(filename);
        match Self::parse_file(&path) {
            Ok(scenario) => {
                let id = scenario.id.clone();
                self.scenarios.write().await.insert(id.clone(), scenario);
                Some(id)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping invalid scenario file");
                None
            }
        }
    }

    /// Drop a definition whose file was removed.
    /// Returns the scenario id when it was cached.
    pub async fn evict_file(&self, filename: &str) -> Option<String> {
        let id = scenario_id(Path::new(filename))?;
        self.scenarios.write().await.remove(&id).map(|_| id)
    }
}

#[async_trait]
impl ScenarioRepository for FileScenarioRepository {
    async fn list_scenarios(&self) -> Vec<Scenario> {
        let mut scenarios: Vec<Scenario> =
            self.scenarios.read().await.values().cloned().collect();
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        scenarios
    }

    async fn get_scenario(&self, id: &str) -> Option<Scenario> {
        self.scenarios.read().await.get(id).cloned()
    }

    async fn load_all(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create scenarios dir: {}", self.dir.display()))?;

        let mut loaded = HashMap::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read scenarios dir: {}", self.dir.display()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let is_yaml = path
                .file_name()
                .and_then(|f| f.to_str())
                .is_some_and(is_definition_file);
            if !is_yaml {
                continue;
            }
            match Self::parse_file(&path) {
                Ok(scenario) => {
                    tracing::info!(scenario_id = %scenario.id, name = %scenario.name, "Loaded scenario");
                    loaded.insert(scenario.id.clone(), scenario);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid scenario file");
                }
            }
        }

        tracing::info!(count = loaded.len(), "Loaded all scenarios");
        *self.scenarios.write().await = loaded;
        Ok(())
    }
}

use anyhow::Result;
use async_trait::async_trait;

use super::Scenario;

#[async_trait]
pub trait ScenarioRepository: Send + Sync {
    async fn list_scenarios(&self) -> Vec<Scenario>;
    async fn get_scenario(&self, id: &str) -> Option<Scenario>;
    async fn load_all(&self) -> Result<()>;
}

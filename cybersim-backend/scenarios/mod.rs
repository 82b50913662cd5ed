pub mod file_repository;
pub mod repository;

use serde::{Deserialize, Serialize};

/// A named command that can be executed as a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// File stem of the definition (`phishing.yaml` -> `phishing`).
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_apps: Vec<String>,
    pub exec_command: String,
    pub file_path: String,
}

/// On-disk YAML shape of a scenario definition.
#[derive(Debug, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_apps: Vec<String>,
    pub exec_command: String,
}

impl ScenarioDefinition {
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.exec_command.trim().is_empty()
    }

    pub fn into_scenario(self, id: String, file_path: String) -> Scenario {
        Scenario {
            id,
            name: self.name,
            description: self.description,
            target_apps: self.target_apps,
            exec_command: self.exec_command,
            file_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_parses_yaml() {
        let yaml = "name: Port scan\ndescription: Scan the lab\ntarget_apps: [web, db]\nexec_command: nmap -sT lab\n";
        let def: ScenarioDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.is_valid());
        let scenario = def.into_scenario("port-scan".into(), "scenarios/port-scan.yaml".into());
        assert_eq!(scenario.target_apps, vec!["web", "db"]);
        assert_eq!(scenario.exec_command, "nmap -sT lab");
    }

    #[test]
    fn test_blank_command_is_invalid() {
        let def: ScenarioDefinition =
            serde_yaml::from_str("name: Empty\nexec_command: '  '\n").unwrap();
        assert!(!def.is_valid());
    }

    #[test]
    fn test_missing_command_fails_to_parse() {
        assert!(serde_yaml::from_str::<ScenarioDefinition>("name: Nope\n").is_err());
    }
}

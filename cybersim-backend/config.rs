use std::path::PathBuf;

/// Server configuration loaded from environment variables.
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    /// Where run records are persisted (`runs/` lives underneath).
    pub data_dir: PathBuf,
    /// Directory holding the scenario YAML definitions.
    pub scenarios_dir: PathBuf,
    /// Shell used to interpret scenario commands (`<shell> -c <command>`).
    pub shell: String,
    /// Per-viewer inbox capacity in the broadcast hub.
    pub viewer_buffer: usize,
    /// Attempts made to persist a run's terminal status before giving up.
    pub finalize_retries: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a Config from any key lookup (as values would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let port = get("PORT").and_then(|v| v.parse().ok()).unwrap_or(5000);

        let sentry_dsn = get("SENTRY_DSN");

        let environment = get("ENVIRONMENT").unwrap_or_else(|| "local".to_string());

        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cybersim")
        });

        let scenarios_dir = get("SCENARIOS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("scenarios"));

        let shell = get("RUN_SHELL").unwrap_or_else(|| "/bin/sh".to_string());

        let viewer_buffer = get("VIEWER_BUFFER")
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(256);

        let finalize_retries = get("FINALIZE_RETRIES")
            .and_then(|v| v.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(5);

        Config {
            port,
            sentry_dsn,
            environment,
            data_dir,
            scenarios_dir,
            shell,
            viewer_buffer,
            finalize_retries,
        }
    }
}

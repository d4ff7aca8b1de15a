use crate::memory::DEFAULT_MEMORY_CAPACITY;
use grantflow_core::{GrantflowError, GrantflowResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Whether task creation dispatches automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `create_task` and task completion trigger dispatch while active.
    #[default]
    Auto,
    /// Only explicit `process_next_task` calls dispatch.
    Manual,
}

/// What to do with dependencies that can never complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPolicy {
    /// Leave blocked tasks pending; report them through `blocked_tasks()`.
    #[default]
    Wait,
    /// Refuse unknown dependency ids at creation and fail the pending
    /// dependents of a failed task.
    Reject,
}

/// Engine configuration. Every field has a default, so a partial TOML
/// table is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub dependency_policy: DependencyPolicy,
    #[serde(default)]
    pub default_task_timeout_ms: Option<u64>,
    #[serde(default)]
    pub default_max_retries: u32,
}

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_tasks() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            memory_capacity: default_memory_capacity(),
            stage_timeout_ms: default_stage_timeout_ms(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            dependency_policy: DependencyPolicy::default(),
            default_task_timeout_ms: None,
            default_max_retries: 0,
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> GrantflowResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| GrantflowError::Config(format!("Invalid orchestrator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> GrantflowResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> GrantflowResult<()> {
        if self.memory_capacity == 0 {
            return Err(GrantflowError::Config(
                "memory_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(GrantflowError::Config(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.stage_timeout_ms == 0 {
            return Err(GrantflowError::Config(
                "stage_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, limit: usize) -> Self {
        self.max_concurrent_tasks = limit;
        self
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.mode, Mode::Auto);
        assert_eq!(config.memory_capacity, 100);
        assert_eq!(config.stage_timeout(), Duration::from_secs(30));
        assert_eq!(config.dependency_policy, DependencyPolicy::Wait);
        assert_eq!(config.default_max_retries, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            mode = "manual"
            dependency_policy = "reject"
            default_task_timeout_ms = 2000
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Manual);
        assert_eq!(config.dependency_policy, DependencyPolicy::Reject);
        assert_eq!(config.default_task_timeout_ms, Some(2000));
        assert_eq!(config.max_concurrent_tasks, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = OrchestratorConfig::from_toml_str("memory_capacity = 0").unwrap_err();
        assert!(matches!(err, GrantflowError::Config(_)));

        let err = OrchestratorConfig::from_toml_str("mode = \"sometimes\"").unwrap_err();
        assert!(err.to_string().contains("Invalid orchestrator config"));

        let config = OrchestratorConfig::default().with_max_concurrent_tasks(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stage_timeout_ms = 500\nmax_concurrent_tasks = 2").unwrap();
        let config = OrchestratorConfig::load(file.path()).unwrap();
        assert_eq!(config.stage_timeout(), Duration::from_millis(500));
        assert_eq!(config.max_concurrent_tasks, 2);

        let missing = OrchestratorConfig::load(Path::new("/nonexistent/grantflow.toml"));
        assert!(matches!(missing, Err(GrantflowError::Io(_))));
    }
}

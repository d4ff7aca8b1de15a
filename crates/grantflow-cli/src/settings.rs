//! `grantflow.toml` loading.
//!
//! The file is optional. Engine settings live under `[orchestrator]`; a
//! top-level `workflows_dir` points at extra workflow templates.

use grantflow_core::{GrantflowError, GrantflowResult};
use grantflow_orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory of `*.toml` workflow templates, relative to the config file.
    #[serde(default)]
    pub workflows_dir: Option<PathBuf>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Settings {
    /// Directory to load custom workflows from, if one is configured.
    pub fn resolved_workflows_dir(&self, config_path: &Path) -> Option<PathBuf> {
        let dir = self.workflows_dir.as_ref()?;
        if dir.is_absolute() {
            return Some(dir.clone());
        }
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        Some(base.join(dir))
    }
}

/// Read and validate `path`. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> GrantflowResult<Settings> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(GrantflowError::Config(format!(
                "Failed to read config '{}': {e}",
                path.display()
            )))
        }
    };
    let settings: Settings = toml::from_str(&content).map_err(|e| {
        GrantflowError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })?;
    settings.orchestrator.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use grantflow_orchestrator::{DependencyPolicy, Mode};
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp.as_file_mut(),
            r#"
workflows_dir = "workflows"

[orchestrator]
mode = "manual"
dependency_policy = "reject"
max_concurrent_tasks = 8
"#
        )
        .unwrap();

        let settings = load_settings(tmp.path()).unwrap();
        assert_eq!(settings.orchestrator.mode, Mode::Manual);
        assert_eq!(settings.orchestrator.dependency_policy, DependencyPolicy::Reject);
        assert_eq!(settings.orchestrator.max_concurrent_tasks, 8);
        // Not specified in the file.
        assert_eq!(settings.orchestrator.memory_capacity, 100);

        let dir = settings.resolved_workflows_dir(tmp.path()).unwrap();
        assert_eq!(dir, tmp.path().parent().unwrap().join("workflows"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = load_settings(Path::new("/nonexistent/path/grantflow.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.resolved_workflows_dir(Path::new("grantflow.toml")).is_none());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "{{{{invalid toml!!!!").unwrap();
        let err_msg = load_settings(tmp.path()).unwrap_err().to_string();
        assert!(err_msg.contains("Failed to parse config"), "unexpected error: {err_msg}");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "[orchestrator]\nstage_timeout_ms = 0").unwrap();
        assert!(matches!(
            load_settings(tmp.path()),
            Err(GrantflowError::Config(_))
        ));
    }
}

//! Core error definitions for the grantflow workspace.
//!
//! Every grantflow crate reports failures through [`GrantflowError`].
//!
//! # Main types
//!
//! - [`GrantflowError`]: Unified error enum for all grantflow subsystems.
//! - [`GrantflowResult`]: Convenience alias for `Result<T, GrantflowError>`.
//! - [`UnresolvedReason`]: Why a task dependency can never be satisfied.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a dependency of a task cannot be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The dependency id does not name any task in the queue.
    Unknown,
    /// The dependency exists but ended in the failed state.
    Failed,
    /// The dependency key is not declared by an earlier task template.
    UndeclaredKey,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::Unknown => write!(f, "unknown task"),
            UnresolvedReason::Failed => write!(f, "dependency failed"),
            UnresolvedReason::UndeclaredKey => write!(f, "undeclared template key"),
        }
    }
}

/// Top-level error type for grantflow.
///
/// Each variant corresponds to a subsystem or a specific failure kind that a
/// caller is expected to branch on.
#[derive(Debug, thiserror::Error)]
pub enum GrantflowError {
    /// An error raised by the orchestrator façade.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A task dependency can never resolve.
    ///
    /// `task` is `None` when the offending task was rejected before it was
    /// assigned an id (submission-time validation). `dependency` is the task
    /// id or template key that failed to resolve.
    #[error("Dependency unresolved: task {task:?} depends on '{dependency}' ({reason})")]
    DependencyUnresolved {
        /// The dependent task, when it exists.
        task: Option<Uuid>,
        /// The dependency id or template key.
        dependency: String,
        /// Why it cannot resolve.
        reason: UnresolvedReason,
    },

    /// A workflow stage did not reach a terminal state before its timeout.
    #[error("Workflow '{workflow}' timed out in stage '{stage}' with {pending} unfinished task(s)")]
    WorkflowTimedOut {
        /// Workflow template id.
        workflow: String,
        /// Stage id that was being awaited.
        stage: String,
        /// Number of stage tasks still not terminal.
        pending: usize,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GrantflowError {
    /// Returns true for [`GrantflowError::DependencyUnresolved`].
    pub fn is_dependency_unresolved(&self) -> bool {
        matches!(self, GrantflowError::DependencyUnresolved { .. })
    }

    /// Returns true for [`GrantflowError::WorkflowTimedOut`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, GrantflowError::WorkflowTimedOut { .. })
    }
}

/// A convenience `Result` alias using [`GrantflowError`].
pub type GrantflowResult<T> = Result<T, GrantflowError>;

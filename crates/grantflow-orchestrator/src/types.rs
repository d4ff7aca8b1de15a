use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a task in the queue.
pub type TaskId = Uuid;

/// Role of each agent in the consulting roster.
///
/// The roster is fixed; every orchestrator tracks exactly these roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Reads program rules and company profiles, extracts eligibility facts.
    Analyzer,
    /// Drafts application sections.
    Writer,
    /// Reviews drafts against program criteria.
    Reviewer,
    /// Finds grant programs and background material.
    Researcher,
    /// Chooses which programs to pursue and how to position the company.
    Strategist,
    /// Tightens drafts for scoring rubrics and length limits.
    Optimizer,
}

impl AgentRole {
    /// The full roster in declaration order.
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Analyzer,
        AgentRole::Writer,
        AgentRole::Reviewer,
        AgentRole::Researcher,
        AgentRole::Strategist,
        AgentRole::Optimizer,
    ];
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Analyzer => write!(f, "analyzer"),
            AgentRole::Writer => write!(f, "writer"),
            AgentRole::Reviewer => write!(f, "reviewer"),
            AgentRole::Researcher => write!(f, "researcher"),
            AgentRole::Strategist => write!(f, "strategist"),
            AgentRole::Optimizer => write!(f, "optimizer"),
        }
    }
}

/// Status of a task in the execution queue.
///
/// Transitions only move forward: `Pending → InProgress → Completed | Failed`,
/// or `Pending → Failed` when a dependency is declared unresolvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Caller-supplied description of a task, before it is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub assigned_to: AgentRole,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: serde_json::Value,
    /// Carried on the task; dispatch order does not consult it.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Per-attempt timeout. Falls back to the engine default when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra attempts after a failure. Falls back to the engine default when unset.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new(assigned_to: AgentRole, task_type: impl Into<String>) -> Self {
        Self {
            assigned_to,
            task_type: task_type.into(),
            description: String::new(),
            context: serde_json::Value::Null,
            priority: 0,
            dependencies: Vec::new(),
            timeout_ms: None,
            max_retries: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// A task in the orchestration queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub assigned_to: AgentRole,
    #[serde(rename = "type")]
    pub task_type: String,
    pub description: String,
    pub context: serde_json::Value,
    pub priority: i32,
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    /// Worker invocations made so far, retries included.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Instantiate a pending task with a fresh id and timestamps.
    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            assigned_to: spec.assigned_to,
            task_type: spec.task_type,
            description: spec.description,
            context: spec.context,
            priority: spec.priority,
            dependencies: spec.dependencies,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            timeout_ms: spec.timeout_ms,
            max_retries: spec.max_retries,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Pending, and every dependency is in `completed_ids`.
    pub fn is_ready(&self, completed_ids: &HashSet<TaskId>) -> bool {
        self.status == TaskStatus::Pending
            && self
                .dependencies
                .iter()
                .all(|dep| completed_ids.contains(dep))
    }
}

/// Status of an agent worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    /// Set after a failed task; cleared only by an explicit agent reset
    /// or by the agent's next successful task.
    Error,
}

/// Rolling performance figures for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    /// completed / (completed + failed); 1.0 before any task settles.
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
}

impl Default for AgentPerformance {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_response_time_ms: 0.0,
        }
    }
}

/// Real-time snapshot of an agent's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub role: AgentRole,
    pub status: AgentStatus,
    pub current_task: Option<TaskId>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub capabilities: BTreeSet<String>,
    pub performance: AgentPerformance,
}

/// Per-agent line of the metrics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub role: AgentRole,
    pub status: AgentStatus,
    pub tasks_completed: u64,
    pub performance: AgentPerformance,
}

/// Engine-wide counters.
///
/// `completed_tasks + failed_tasks <= total_tasks` always holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Tasks ever created since construction or the last reset.
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    /// Extra worker attempts made by the retry policy.
    pub retries: u64,
    /// Mean wall-clock duration of completed tasks.
    pub avg_task_duration_ms: f64,
}

impl Metrics {
    /// Count a completed task and fold its duration into the mean.
    pub fn record_completion(&mut self, duration: Duration) {
        self.completed_tasks += 1;
        let n = self.completed_tasks as f64;
        let ms = duration.as_secs_f64() * 1000.0;
        self.avg_task_duration_ms += (ms - self.avg_task_duration_ms) / n;
    }

    pub fn record_failure(&mut self) {
        self.failed_tasks += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_from_spec() {
        let task = Task::from_spec(
            TaskSpec::new(AgentRole::Writer, "draft_section")
                .with_description("Draft executive summary")
                .with_context(serde_json::json!({ "program": "eic" })),
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.assigned_to, AgentRole::Writer);
        assert_eq!(task.description, "Draft executive summary");
        assert_eq!(task.context["program"], "eic");
        assert!(task.dependencies.is_empty());
        assert!(task.result.is_none());
        assert_eq!(task.attempts, 0);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::from_spec(TaskSpec::new(AgentRole::Analyzer, "score"));
        let b = Task::from_spec(TaskSpec::new(AgentRole::Analyzer, "score"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_task_is_ready() {
        let dep_id = Uuid::new_v4();
        let free = Task::from_spec(TaskSpec::new(AgentRole::Researcher, "program_search"));
        assert!(free.is_ready(&HashSet::new()));

        let waiting = Task::from_spec(
            TaskSpec::new(AgentRole::Writer, "draft_section").with_dependencies(vec![dep_id]),
        );
        assert!(!waiting.is_ready(&HashSet::new()));
        assert!(waiting.is_ready(&HashSet::from([dep_id])));
    }

    #[test]
    fn test_task_not_ready_when_in_progress() {
        let mut task = Task::from_spec(TaskSpec::new(AgentRole::Reviewer, "review_draft"));
        task.status = TaskStatus::InProgress;
        assert!(!task.is_ready(&HashSet::new()));
    }

    #[test]
    fn test_spec_builder_carries_retry_and_timeout() {
        let spec = TaskSpec::new(AgentRole::Optimizer, "tighten")
            .with_priority(7)
            .with_timeout(Duration::from_millis(1500))
            .with_max_retries(2);
        let task = Task::from_spec(spec);
        assert_eq!(task.priority, 7);
        assert_eq!(task.timeout_ms, Some(1500));
        assert_eq!(task.max_retries, Some(2));
        assert_eq!(task.task_type, "tighten");
    }

    #[test]
    fn test_agent_role_display() {
        assert_eq!(AgentRole::Analyzer.to_string(), "analyzer");
        assert_eq!(AgentRole::Strategist.to_string(), "strategist");
        assert_eq!(AgentRole::ALL.len(), 6);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_metrics_running_mean() {
        let mut metrics = Metrics::default();
        metrics.record_completion(Duration::from_millis(100));
        metrics.record_completion(Duration::from_millis(300));
        assert_eq!(metrics.completed_tasks, 2);
        assert!((metrics.avg_task_duration_ms - 200.0).abs() < 1e-6);
        metrics.record_failure();
        assert_eq!(metrics.failed_tasks, 1);
    }

    #[test]
    fn test_task_spec_deserializes_with_defaults() {
        let spec: TaskSpec =
            serde_json::from_str(r#"{"assigned_to":"writer","type":"draft_section"}"#).unwrap();
        assert_eq!(spec.assigned_to, AgentRole::Writer);
        assert_eq!(spec.task_type, "draft_section");
        assert_eq!(spec.priority, 0);
        assert!(spec.dependencies.is_empty());
        assert!(spec.context.is_null());
    }
}

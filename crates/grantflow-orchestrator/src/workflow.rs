use crate::engine::Orchestrator;
use crate::events::OrchestratorEvent;
use crate::types::{AgentRole, TaskId, TaskSpec};
use grantflow_core::{GrantflowError, GrantflowResult, UnresolvedReason};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

/// A task to create when its stage begins.
///
/// `key` names the task within the workflow so later templates can list it
/// in `depends_on`; keys are resolved to task ids at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub assigned_to: AgentRole,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskTemplate {
    pub fn new(assigned_to: AgentRole, task_type: impl Into<String>) -> Self {
        Self {
            assigned_to,
            task_type: task_type.into(),
            description: String::new(),
            context: serde_json::Value::Null,
            priority: 0,
            key: None,
            depends_on: Vec::new(),
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

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    fn to_spec(&self, dependencies: Vec<TaskId>) -> TaskSpec {
        TaskSpec {
            assigned_to: self.assigned_to,
            task_type: self.task_type.clone(),
            description: self.description.clone(),
            context: self.context.clone(),
            priority: self.priority,
            dependencies,
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    pub id: String,
    pub name: String,
    /// Informational; dispatch follows each task's `assigned_to`.
    #[serde(default)]
    pub agent_roles: Vec<AgentRole>,
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
}

impl StageTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_roles: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskTemplate) -> Self {
        if !self.agent_roles.contains(&task.assigned_to) {
            self.agent_roles.push(task.assigned_to);
        }
        self.tasks.push(task);
        self
    }
}

/// An ordered list of stages. Stage N+1 begins only after every task of
/// stage N is completed or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stages: Vec<StageTemplate>,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            stages: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_stage(mut self, stage: StageTemplate) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn task_count(&self) -> usize {
        self.stages.iter().map(|s| s.tasks.len()).sum()
    }

    /// Check that every `depends_on` key names a task declared earlier in
    /// template order, and that keys are unique.
    pub fn validate(&self) -> GrantflowResult<()> {
        let mut declared: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            for task in &stage.tasks {
                if let Some(dep) = task.depends_on.iter().find(|d| !declared.contains(d.as_str())) {
                    return Err(GrantflowError::DependencyUnresolved {
                        task: None,
                        dependency: dep.clone(),
                        reason: UnresolvedReason::UndeclaredKey,
                    });
                }
                if let Some(key) = &task.key {
                    if !declared.insert(key.as_str()) {
                        return Err(GrantflowError::Config(format!(
                            "Workflow '{}' declares task key '{key}' twice",
                            self.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Progress of the workflow currently executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWorkflow {
    pub id: String,
    pub name: String,
    pub stage: String,
    pub stage_index: usize,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage_id: String,
    pub task_ids: Vec<TaskId>,
    pub completed: usize,
    pub failed: usize,
}

/// Outcome of a workflow that ran every stage. Failed tasks do not abort a
/// workflow; they are counted here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: String,
    pub stages: Vec<StageReport>,
}

impl WorkflowReport {
    pub fn completed_tasks(&self) -> usize {
        self.stages.iter().map(|s| s.completed).sum()
    }

    pub fn failed_tasks(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}

impl Orchestrator {
    /// Run `template` stage by stage.
    ///
    /// Each stage's tasks are created, then the call waits until all of them
    /// are completed or failed. If a stage does not settle within the
    /// configured stage timeout the workflow is abandoned and
    /// [`GrantflowError::WorkflowTimedOut`] is returned; its tasks are left
    /// in place.
    ///
    /// Tasks only run if something dispatches them: an active engine in auto
    /// mode does, a manual-mode engine needs `process_next_task` calls from
    /// elsewhere.
    pub async fn execute_workflow(
        &self,
        template: &WorkflowTemplate,
    ) -> GrantflowResult<WorkflowReport> {
        template.validate()?;

        let total = template.stages.len();
        let mut progress = CurrentWorkflow {
            id: template.id.clone(),
            name: template.name.clone(),
            stage: template
                .stages
                .first()
                .map(|s| s.id.clone())
                .unwrap_or_default(),
            stage_index: 0,
            progress: 0.0,
        };
        self.set_current_workflow(Some(progress.clone()));
        info!(workflow = %template.id, stages = total, "Workflow started");
        self.emit(&OrchestratorEvent::WorkflowStarted {
            workflow_id: template.id.clone(),
            name: template.name.clone(),
        });

        let mut keys: HashMap<&str, TaskId> = HashMap::new();
        let mut report = WorkflowReport {
            workflow_id: template.id.clone(),
            stages: Vec::with_capacity(total),
        };

        for (index, stage) in template.stages.iter().enumerate() {
            progress.stage = stage.id.clone();
            progress.stage_index = index;
            progress.progress = index as f64 / total as f64 * 100.0;
            self.set_current_workflow(Some(progress.clone()));
            info!(
                workflow = %template.id,
                stage = %stage.id,
                progress = progress.progress,
                "Workflow stage started"
            );
            self.emit(&OrchestratorEvent::WorkflowStage {
                workflow_id: template.id.clone(),
                stage: stage.id.clone(),
                progress: progress.progress,
            });

            let mut ids = Vec::with_capacity(stage.tasks.len());
            for task in &stage.tasks {
                let deps = task
                    .depends_on
                    .iter()
                    .filter_map(|k| keys.get(k.as_str()).copied())
                    .collect();
                let created = match self.create_task(task.to_spec(deps)) {
                    Ok(created) => created,
                    Err(e) => return Err(self.abandon(template, e)),
                };
                if let Some(key) = &task.key {
                    keys.insert(key.as_str(), created.id);
                }
                ids.push(created.id);
            }

            if let Err(pending) = self.wait_for_settled(&ids, self.config().stage_timeout()).await {
                let err = GrantflowError::WorkflowTimedOut {
                    workflow: template.id.clone(),
                    stage: stage.id.clone(),
                    pending,
                };
                return Err(self.abandon(template, err));
            }

            let (completed, failed) = self.outcome_counts(&ids);
            report.stages.push(StageReport {
                stage_id: stage.id.clone(),
                task_ids: ids,
                completed,
                failed,
            });
        }

        progress.progress = 100.0;
        self.set_current_workflow(Some(progress));
        info!(
            workflow = %template.id,
            completed = report.completed_tasks(),
            failed = report.failed_tasks(),
            "Workflow completed"
        );
        self.emit(&OrchestratorEvent::WorkflowCompleted {
            workflow_id: template.id.clone(),
        });
        self.set_current_workflow(None);
        Ok(report)
    }

    /// Wait until every id is terminal. On timeout, returns how many are not.
    async fn wait_for_settled(&self, ids: &[TaskId], limit: Duration) -> Result<(), usize> {
        let mut settled = self.settled_receiver();
        let wait = async {
            loop {
                if self.unfinished(ids) == 0 {
                    return;
                }
                if settled.changed().await.is_err() {
                    return;
                }
            }
        };
        match tokio::time::timeout(limit, wait).await {
            Ok(()) if self.unfinished(ids) == 0 => Ok(()),
            _ => Err(self.unfinished(ids)),
        }
    }

    fn abandon(&self, template: &WorkflowTemplate, err: GrantflowError) -> GrantflowError {
        self.set_current_workflow(None);
        warn!(workflow = %template.id, error = %err, "Workflow abandoned");
        self.emit(&OrchestratorEvent::WorkflowFailed {
            workflow_id: template.id.clone(),
            error: err.to_string(),
        });
        err
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn keyed(role: AgentRole, key: &str) -> TaskTemplate {
        TaskTemplate::new(role, "generic").with_key(key)
    }

    #[test]
    fn test_validate_accepts_backward_references() {
        let template = WorkflowTemplate::new("wf", "Workflow")
            .with_stage(StageTemplate::new("one", "One").with_task(keyed(AgentRole::Researcher, "r")))
            .with_stage(
                StageTemplate::new("two", "Two")
                    .with_task(keyed(AgentRole::Analyzer, "a").depends_on(["r"]))
                    .with_task(TaskTemplate::new(AgentRole::Writer, "draft").depends_on(["r", "a"])),
            );
        assert!(template.validate().is_ok());
        assert_eq!(template.task_count(), 3);
        assert_eq!(
            template.stages[1].agent_roles,
            vec![AgentRole::Analyzer, AgentRole::Writer]
        );
    }

    #[test]
    fn test_validate_rejects_forward_and_unknown_keys() {
        let forward = WorkflowTemplate::new("wf", "Workflow").with_stage(
            StageTemplate::new("one", "One")
                .with_task(TaskTemplate::new(AgentRole::Writer, "draft").depends_on(["later"]))
                .with_task(keyed(AgentRole::Researcher, "later")),
        );
        let err = forward.validate().unwrap_err();
        assert!(matches!(
            err,
            GrantflowError::DependencyUnresolved {
                reason: UnresolvedReason::UndeclaredKey,
                ..
            }
        ));
        assert!(err.to_string().contains("'later'"));
    }

    #[test]
    fn test_validate_rejects_duplicate_keys() {
        let template = WorkflowTemplate::new("wf", "Workflow").with_stage(
            StageTemplate::new("one", "One")
                .with_task(keyed(AgentRole::Writer, "x"))
                .with_task(keyed(AgentRole::Reviewer, "x")),
        );
        assert!(matches!(template.validate(), Err(GrantflowError::Config(_))));
    }

    #[test]
    fn test_template_from_toml() {
        let template: WorkflowTemplate = toml::from_str(
            r#"
            id = "quick-check"
            name = "Quick check"

            [[stages]]
            id = "scan"
            name = "Scan"

            [[stages.tasks]]
            assigned_to = "researcher"
            type = "program_search"
            key = "search"

            [[stages.tasks]]
            assigned_to = "analyzer"
            type = "score_fit"
            depends_on = ["search"]
            "#,
        )
        .unwrap();
        assert_eq!(template.stages[0].tasks[1].depends_on, vec!["search"]);
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_report_totals() {
        let report = WorkflowReport {
            workflow_id: "wf".into(),
            stages: vec![
                StageReport {
                    stage_id: "a".into(),
                    task_ids: vec![],
                    completed: 2,
                    failed: 1,
                },
                StageReport {
                    stage_id: "b".into(),
                    task_ids: vec![],
                    completed: 1,
                    failed: 0,
                },
            ],
        };
        assert_eq!(report.completed_tasks(), 3);
        assert_eq!(report.failed_tasks(), 1);
    }
}

use crate::types::{AgentRole, Task, TaskId, TaskStatus};
use chrono::Utc;
use grantflow_core::{GrantflowError, UnresolvedReason};
use std::collections::{HashMap, HashSet, VecDeque};

/// A task queue with dependency-gated eligibility.
///
/// Tasks are kept in creation order. Selection scans that order and ignores
/// `priority`. A newly added task is held back from selection until
/// [`TaskQueue::release`] is called for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    completed: HashSet<TaskId>,
    held: HashSet<TaskId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the queue. It is not eligible until released.
    pub fn add(&mut self, task: Task) -> TaskId {
        let id = task.id;
        self.index.insert(id, self.tasks.len());
        self.tasks.push(task);
        self.held.insert(id);
        id
    }

    /// Make a held task eligible for selection.
    pub fn release(&mut self, id: TaskId) -> bool {
        self.held.remove(&id)
    }

    /// Get a task by ID.
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.index.get(&id).map(|&i| &self.tasks[i])
    }

    fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.index.get(&id).map(|&i| &mut self.tasks[i])
    }

    /// First pending task, in creation order, whose dependencies are all
    /// completed and whose agent passes `available`.
    pub fn next_eligible(&self, available: impl Fn(AgentRole) -> bool) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| {
                t.is_ready(&self.completed)
                    && !self.held.contains(&t.id)
                    && available(t.assigned_to)
            })
    }

    /// Mark a pending task as in progress.
    pub fn mark_in_progress(&mut self, id: TaskId) -> bool {
        match self.get_mut(id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::InProgress;
                task.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Count one more worker invocation for an in-progress task.
    pub fn record_attempt(&mut self, id: TaskId) -> bool {
        match self.get_mut(id) {
            Some(task) if task.status == TaskStatus::InProgress => {
                task.attempts += 1;
                task.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Mark an in-progress task as completed with its result.
    pub fn mark_completed(&mut self, id: TaskId, result: serde_json::Value) -> bool {
        let marked = match self.get_mut(id) {
            Some(task) if task.status == TaskStatus::InProgress => {
                let now = Utc::now();
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                task.updated_at = now;
                task.completed_at = Some(now);
                true
            }
            _ => false,
        };
        if marked {
            self.completed.insert(id);
        }
        marked
    }

    /// Mark a pending or in-progress task as failed.
    pub fn mark_failed(&mut self, id: TaskId, error: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(task) if !task.status.is_terminal() => {
                let now = Utc::now();
                task.status = TaskStatus::Failed;
                task.error = Some(error.into());
                task.updated_at = now;
                task.completed_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// List all tasks in creation order.
    pub fn all_tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of `ids` not yet terminal. Ids missing from the queue count as unfinished.
    pub fn unfinished(&self, ids: &[TaskId]) -> usize {
        ids.iter()
            .filter(|id| !self.get(**id).is_some_and(|t| t.status.is_terminal()))
            .count()
    }

    /// The first dependency of `task` that can never complete.
    pub fn unresolved_dependency(&self, task: &Task) -> Option<(TaskId, UnresolvedReason)> {
        task.dependencies.iter().find_map(|dep| match self.get(*dep) {
            None => Some((*dep, UnresolvedReason::Unknown)),
            Some(t) if t.status == TaskStatus::Failed => Some((*dep, UnresolvedReason::Failed)),
            Some(_) => None,
        })
    }

    /// One `DependencyUnresolved` error per pending task that can never run,
    /// in creation order.
    ///
    /// A task waiting on another blocked task is blocked as well; it reports
    /// the unknown or failed dependency at the root of its chain.
    pub fn blocked(&self) -> Vec<GrantflowError> {
        let mut roots: HashMap<TaskId, (TaskId, UnresolvedReason)> = HashMap::new();
        let mut frontier = VecDeque::new();
        for task in self.tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
            if let Some(root) = self.unresolved_dependency(task) {
                roots.insert(task.id, root);
                frontier.push_back(task.id);
            }
        }
        while let Some(current) = frontier.pop_front() {
            let Some(&root) = roots.get(&current) else {
                continue;
            };
            for task in &self.tasks {
                if task.status == TaskStatus::Pending
                    && !roots.contains_key(&task.id)
                    && task.dependencies.contains(&current)
                {
                    roots.insert(task.id, root);
                    frontier.push_back(task.id);
                }
            }
        }
        self.tasks
            .iter()
            .filter_map(|t| {
                roots
                    .get(&t.id)
                    .map(|(dep, reason)| GrantflowError::DependencyUnresolved {
                        task: Some(t.id),
                        dependency: dep.to_string(),
                        reason: *reason,
                    })
            })
            .collect()
    }

    /// Pending tasks that depend on `root`, directly or transitively,
    /// in creation order.
    pub fn pending_dependents(&self, root: TaskId) -> Vec<TaskId> {
        let mut found: HashSet<TaskId> = HashSet::new();
        let mut frontier = VecDeque::from([root]);
        while let Some(current) = frontier.pop_front() {
            for task in &self.tasks {
                if task.status == TaskStatus::Pending
                    && !found.contains(&task.id)
                    && task.dependencies.contains(&current)
                {
                    found.insert(task.id);
                    frontier.push_back(task.id);
                }
            }
        }
        self.tasks
            .iter()
            .filter(|t| found.contains(&t.id))
            .map(|t| t.id)
            .collect()
    }
}

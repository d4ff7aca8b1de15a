use crate::profiles::default_capabilities;
use crate::types::{AgentPerformance, AgentRole, AgentState, AgentStatus, AgentSummary, TaskId};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Tracks state and performance for every role in the roster.
///
/// Owned by the orchestrator and mutated only by its dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRegistry {
    states: BTreeMap<AgentRole, AgentState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        let states = AgentRole::ALL
            .iter()
            .map(|role| {
                (
                    *role,
                    AgentState {
                        role: *role,
                        status: AgentStatus::Idle,
                        current_task: None,
                        tasks_completed: 0,
                        tasks_failed: 0,
                        capabilities: default_capabilities(*role),
                        performance: AgentPerformance::default(),
                    },
                )
            })
            .collect();
        Self { states }
    }

    /// Mark an agent as busy with a task.
    pub fn start_task(&mut self, role: AgentRole, task_id: TaskId) {
        if let Some(state) = self.states.get_mut(&role) {
            state.current_task = Some(task_id);
            state.status = AgentStatus::Busy;
        }
    }

    /// Record a successful task and return the agent to idle.
    pub fn finish_task(&mut self, role: AgentRole, elapsed: Duration) {
        if let Some(state) = self.states.get_mut(&role) {
            state.current_task = None;
            state.status = AgentStatus::Idle;
            state.tasks_completed += 1;
            update_performance(state, elapsed);
        }
    }

    /// Record a failed task. The agent stays in `Error` until reset.
    pub fn fail_task(&mut self, role: AgentRole, elapsed: Duration) {
        if let Some(state) = self.states.get_mut(&role) {
            state.current_task = None;
            state.status = AgentStatus::Error;
            state.tasks_failed += 1;
            update_performance(state, elapsed);
        }
    }

    /// Return an agent in `Error` to `Idle`. Busy and idle agents are left alone.
    pub fn reset_agent(&mut self, role: AgentRole) -> bool {
        match self.states.get_mut(&role) {
            Some(state) if state.status == AgentStatus::Error => {
                state.status = AgentStatus::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn is_busy(&self, role: AgentRole) -> bool {
        self.states
            .get(&role)
            .is_some_and(|s| s.status == AgentStatus::Busy)
    }

    /// Roles currently executing a task.
    pub fn busy_roles(&self) -> HashSet<AgentRole> {
        self.states
            .values()
            .filter(|s| s.status == AgentStatus::Busy)
            .map(|s| s.role)
            .collect()
    }

    /// Get the state of a specific agent.
    pub fn get(&self, role: AgentRole) -> Option<&AgentState> {
        self.states.get(&role)
    }

    /// Snapshot of all agent states, ordered by role.
    pub fn snapshot(&self) -> Vec<AgentState> {
        self.states.values().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.states
            .values()
            .map(|s| AgentSummary {
                role: s.role,
                status: s.status,
                tasks_completed: s.tasks_completed,
                performance: s.performance.clone(),
            })
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn update_performance(state: &mut AgentState, elapsed: Duration) {
    let settled = state.tasks_completed + state.tasks_failed;
    if settled == 0 {
        return;
    }
    let n = settled as f64;
    let ms = elapsed.as_secs_f64() * 1000.0;
    let perf = &mut state.performance;
    perf.success_rate = state.tasks_completed as f64 / n;
    perf.avg_response_time_ms += (ms - perf.avg_response_time_ms) / n;
}

use crate::bus::Message;
use crate::memory::MemoryEntry;
use crate::types::Task;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything the orchestrator announces to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Started,
    Stopped,
    Reset,
    TaskCreated(Task),
    TaskStarted(Task),
    TaskCompleted(Task),
    TaskFailed(Task),
    MessageSent(Message),
    MemoryAdded(MemoryEntry),
    WorkflowStarted {
        workflow_id: String,
        name: String,
    },
    WorkflowStage {
        workflow_id: String,
        stage: String,
        progress: f64,
    },
    WorkflowCompleted {
        workflow_id: String,
    },
    WorkflowFailed {
        workflow_id: String,
        error: String,
    },
}

impl OrchestratorEvent {
    /// Wire name of the event, e.g. `task:completed`.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::Started => "orchestrator:started",
            OrchestratorEvent::Stopped => "orchestrator:stopped",
            OrchestratorEvent::Reset => "orchestrator:reset",
            OrchestratorEvent::TaskCreated(_) => "task:created",
            OrchestratorEvent::TaskStarted(_) => "task:started",
            OrchestratorEvent::TaskCompleted(_) => "task:completed",
            OrchestratorEvent::TaskFailed(_) => "task:failed",
            OrchestratorEvent::MessageSent(_) => "message:sent",
            OrchestratorEvent::MemoryAdded(_) => "memory:added",
            OrchestratorEvent::WorkflowStarted { .. } => "workflow:started",
            OrchestratorEvent::WorkflowStage { .. } => "workflow:stage",
            OrchestratorEvent::WorkflowCompleted { .. } => "workflow:completed",
            OrchestratorEvent::WorkflowFailed { .. } => "workflow:failed",
        }
    }

    /// The event body as JSON (`null` for lifecycle events).
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Handle returned by [`EventRegistry::on`]; pass it to `off` to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener = Arc<dyn Fn(&OrchestratorEvent) + Send + Sync>;

/// Synchronous observer registry.
///
/// Listeners run on the emitting thread, in registration order, with no lock
/// held, so a listener may call back into the orchestrator.
pub struct EventRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(Subscription, Listener)>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&OrchestratorEvent) + Send + Sync + 'static,
    {
        let sub = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((sub, Arc::new(listener)));
        sub
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(s, _)| *s != subscription);
        listeners.len() < before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn emit(&self, event: &OrchestratorEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentRole, TaskSpec};

    #[test]
    fn test_listeners_run_in_registration_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.on(move |e: &OrchestratorEvent| seen.lock().push(format!("{tag}:{}", e.name())));
        }
        registry.emit(&OrchestratorEvent::Started);
        assert_eq!(
            *seen.lock(),
            vec![
                "first:orchestrator:started",
                "second:orchestrator:started",
                "third:orchestrator:started"
            ]
        );
    }

    #[test]
    fn test_off_unsubscribes() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(0));
        let s = Arc::clone(&seen);
        let sub = registry.on(move |_e: &OrchestratorEvent| *s.lock() += 1);

        registry.emit(&OrchestratorEvent::Stopped);
        assert!(registry.off(sub));
        assert!(!registry.off(sub));
        registry.emit(&OrchestratorEvent::Stopped);

        assert_eq!(*seen.lock(), 1);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_names_and_payloads() {
        let task = Task::from_spec(TaskSpec::new(AgentRole::Writer, "draft_section"));
        let event = OrchestratorEvent::TaskCreated(task.clone());
        assert_eq!(event.name(), "task:created");
        assert_eq!(event.payload()["id"], serde_json::json!(task.id));

        let stage = OrchestratorEvent::WorkflowStage {
            workflow_id: "wf".into(),
            stage: "draft".into(),
            progress: 50.0,
        };
        assert_eq!(stage.name(), "workflow:stage");
        assert_eq!(stage.payload()["progress"], serde_json::json!(50.0));

        assert!(OrchestratorEvent::Reset.payload().is_null());
    }
}

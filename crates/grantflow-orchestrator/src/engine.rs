use crate::bus::{Delivery, Message, MessageBus, MessageSpec};
use crate::config::{DependencyPolicy, Mode, OrchestratorConfig};
use crate::events::{EventRegistry, OrchestratorEvent, Subscription};
use crate::memory::{MemoryEntry, MemoryEntrySpec, MemoryFilter, SharedMemory};
use crate::registry::AgentRegistry;
use crate::task_queue::TaskQueue;
use crate::types::{
    AgentRole, AgentState, AgentSummary, Metrics, Task, TaskId, TaskSpec, TaskStatus,
};
use crate::worker::{Worker, WorkerError, WorkerRequest, WorkerResponse};
use crate::workflow::CurrentWorkflow;
use grantflow_core::{GrantflowError, GrantflowResult, UnresolvedReason};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Read-only snapshot of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorState {
    pub is_active: bool,
    pub mode: Mode,
    pub active_agents: Vec<AgentRole>,
    pub task_queue: Vec<Task>,
    pub message_log: Vec<Message>,
    pub shared_memory: Vec<MemoryEntry>,
    pub metrics: Metrics,
    pub current_workflow: Option<CurrentWorkflow>,
}

/// Counters plus one summary per agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub metrics: Metrics,
    pub agents: Vec<AgentSummary>,
}

/// Outcome of one dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The task was marked in progress and handed to the worker.
    Started(TaskId),
    /// No pending task is eligible right now.
    Idle,
    /// Every executor slot is taken.
    Saturated,
}

struct EngineState {
    /// Bumped by `reset()`; results from an older epoch are discarded.
    epoch: u64,
    is_active: bool,
    mode: Mode,
    active_agents: Vec<AgentRole>,
    queue: TaskQueue,
    memory: SharedMemory,
    agents: AgentRegistry,
    metrics: Metrics,
    current_workflow: Option<CurrentWorkflow>,
    in_flight: HashMap<TaskId, CancellationToken>,
}

impl EngineState {
    fn new(config: &OrchestratorConfig) -> Self {
        Self {
            epoch: 0,
            is_active: false,
            mode: config.mode,
            active_agents: Vec::new(),
            queue: TaskQueue::new(),
            memory: SharedMemory::new(config.memory_capacity),
            agents: AgentRegistry::new(),
            metrics: Metrics::default(),
            current_workflow: None,
            in_flight: HashMap::new(),
        }
    }

    fn auto_dispatch(&self) -> bool {
        self.is_active && self.mode == Mode::Auto
    }
}

struct Inner {
    config: OrchestratorConfig,
    worker: Arc<dyn Worker>,
    state: Mutex<EngineState>,
    bus: MessageBus,
    events: EventRegistry,
    executor: Arc<Semaphore>,
    /// Incremented every time a task settles (or the engine resets).
    settled: watch::Sender<u64>,
}

/// The orchestration engine.
///
/// A cheap handle over shared state: clones drive the same queue, memory
/// and agents. Separate `Orchestrator::new` calls never share state.
///
/// State transitions are serialized behind one lock that is never held
/// across an await point or while listeners and handlers run. Worker calls
/// run on spawned tokio tasks, at most `max_concurrent_tasks` at a time.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator with the default configuration.
    pub fn new<W: Worker + 'static>(worker: W) -> Self {
        Self::build(OrchestratorConfig::default(), Arc::new(worker))
    }

    /// Create with a custom configuration.
    pub fn with_config<W: Worker + 'static>(
        config: OrchestratorConfig,
        worker: W,
    ) -> GrantflowResult<Self> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(worker)))
    }

    fn build(config: OrchestratorConfig, worker: Arc<dyn Worker>) -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState::new(&config)),
                executor: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
                bus: MessageBus::new(),
                events: EventRegistry::new(),
                worker,
                settled,
                config,
            }),
        }
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    // --- Lifecycle ---

    /// Activate the engine and bring the full roster online.
    ///
    /// Does not touch the queue or memory, and does not dispatch by itself.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            state.is_active = true;
            state.active_agents = AgentRole::ALL.to_vec();
        }
        info!("Orchestrator started");
        self.inner.events.emit(&OrchestratorEvent::Started);
    }

    /// Deactivate the engine. Tasks already handed to a worker keep running;
    /// only new automatic dispatch stops.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.is_active = false;
            state.active_agents.clear();
        }
        info!("Orchestrator stopped");
        self.inner.events.emit(&OrchestratorEvent::Stopped);
    }

    /// Discard all state and return to the freshly constructed state.
    ///
    /// In-flight worker calls are cancelled and their late results ignored.
    /// Message handlers and event listeners stay registered.
    pub fn reset(&self) {
        let cancelled: Vec<CancellationToken> = {
            let mut state = self.inner.state.lock();
            let epoch = state.epoch + 1;
            let tokens = state.in_flight.drain().map(|(_, token)| token).collect();
            *state = EngineState::new(&self.inner.config);
            state.epoch = epoch;
            tokens
        };
        for token in &cancelled {
            token.cancel();
        }
        self.inner.bus.clear_log();
        self.inner.settled.send_modify(|n| *n += 1);
        info!(cancelled = cancelled.len(), "Orchestrator reset");
        self.inner.events.emit(&OrchestratorEvent::Reset);
    }

    /// Switch between manual and automatic dispatch.
    pub fn set_mode(&self, mode: Mode) {
        self.inner.state.lock().mode = mode;
    }

    /// Current dispatch mode.
    pub fn mode(&self) -> Mode {
        self.inner.state.lock().mode
    }

    /// Whether `start()` has been called since the last `stop()` or `reset()`.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().is_active
    }

    // --- Snapshots ---

    /// Snapshot of the queue, message log, memory, metrics and workflow.
    pub fn state(&self) -> OrchestratorState {
        let message_log = self.inner.bus.log();
        let state = self.inner.state.lock();
        OrchestratorState {
            is_active: state.is_active,
            mode: state.mode,
            active_agents: state.active_agents.clone(),
            task_queue: state.queue.all_tasks().to_vec(),
            message_log,
            shared_memory: state.memory.entries().to_vec(),
            metrics: state.metrics.clone(),
            current_workflow: state.current_workflow.clone(),
        }
    }

    /// Snapshot of one agent.
    pub fn agent_state(&self, role: AgentRole) -> Option<AgentState> {
        self.inner.state.lock().agents.get(role).cloned()
    }

    /// Snapshot of one task.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.state.lock().queue.get(id).cloned()
    }

    /// Engine counters and per-agent performance.
    pub fn metrics(&self) -> MetricsReport {
        let state = self.inner.state.lock();
        MetricsReport {
            metrics: state.metrics.clone(),
            agents: state.agents.summaries(),
        }
    }

    /// One `DependencyUnresolved` error per pending task that can never run,
    /// including tasks that only wait on other blocked tasks.
    pub fn blocked_tasks(&self) -> Vec<GrantflowError> {
        self.inner.state.lock().queue.blocked()
    }

    /// Number of tasks currently handed to the worker.
    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Return an agent in `Error` to `Idle`.
    pub fn reset_agent(&self, role: AgentRole) -> bool {
        let reset = self.inner.state.lock().agents.reset_agent(role);
        if reset {
            info!(role = %role, "Agent reset to idle");
        }
        reset
    }

    // --- Tasks ---

    /// Queue a new task.
    ///
    /// The task becomes eligible for dispatch only after `task:created` has
    /// been delivered to every listener. Under [`DependencyPolicy::Reject`],
    /// unknown or failed dependencies are refused and nothing is queued. In auto mode on an active engine, the
    /// dispatch loop runs immediately afterwards.
    pub fn create_task(&self, spec: TaskSpec) -> GrantflowResult<Task> {
        let (task, auto) = {
            let mut state = self.inner.state.lock();
            let task = Task::from_spec(spec);
            if self.inner.config.dependency_policy == DependencyPolicy::Reject {
                if let Some((dep, reason)) = state.queue.unresolved_dependency(&task) {
                    return Err(GrantflowError::DependencyUnresolved {
                        task: None,
                        dependency: dep.to_string(),
                        reason,
                    });
                }
            }
            state.queue.add(task.clone());
            state.metrics.total_tasks += 1;
            (task, state.auto_dispatch())
        };

        info!(
            task_id = %task.id,
            role = %task.assigned_to,
            task_type = %task.task_type,
            "Task created"
        );
        self.inner
            .events
            .emit(&OrchestratorEvent::TaskCreated(task.clone()));
        // Dispatchable only once `task:created` has gone out.
        self.inner.state.lock().queue.release(task.id);

        if auto {
            self.dispatch_ready();
        }
        Ok(task)
    }

    /// One dispatch step: claim the first eligible pending task in creation
    /// order and hand it to the worker on a spawned task.
    ///
    /// Tasks whose agent is busy are skipped. Priority is not consulted.
    /// Must be called from within a tokio runtime.
    pub fn process_next_task(&self) -> GrantflowResult<Dispatch> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            GrantflowError::Orchestrator(format!("dispatch requires a tokio runtime: {e}"))
        })?;
        let Ok(permit) = Arc::clone(&self.inner.executor).try_acquire_owned() else {
            return Ok(Dispatch::Saturated);
        };

        let claimed = {
            let mut state = self.inner.state.lock();
            let busy = state.agents.busy_roles();
            let next = state
                .queue
                .next_eligible(|role| !busy.contains(&role))
                .map(|t| (t.id, t.assigned_to));
            match next {
                Some((id, role)) => {
                    state.queue.mark_in_progress(id);
                    state.agents.start_task(role, id);
                    let token = CancellationToken::new();
                    state.in_flight.insert(id, token.clone());
                    let epoch = state.epoch;
                    state.queue.get(id).cloned().map(|task| (task, token, epoch))
                }
                None => {
                    let blocked = state.queue.blocked().len();
                    if blocked > 0 && state.in_flight.is_empty() {
                        warn!(blocked, "No eligible task: pending tasks depend on unresolvable tasks");
                    }
                    None
                }
            }
        };
        let Some((task, token, epoch)) = claimed else {
            return Ok(Dispatch::Idle);
        };

        let id = task.id;
        info!(task_id = %id, role = %task.assigned_to, "Task dispatched");
        self.inner
            .events
            .emit(&OrchestratorEvent::TaskStarted(task.clone()));

        let this = self.clone();
        runtime.spawn(async move {
            this.run_task(task, token, epoch, permit).await;
        });
        Ok(Dispatch::Started(id))
    }

    /// Dispatch until nothing more can start. Returns the number started.
    pub fn dispatch_ready(&self) -> usize {
        let mut started = 0;
        loop {
            match self.process_next_task() {
                Ok(Dispatch::Started(_)) => started += 1,
                Ok(Dispatch::Idle | Dispatch::Saturated) => break,
                Err(e) => {
                    error!(error = %e, "Dispatch failed");
                    break;
                }
            }
        }
        started
    }

    /// Drive dispatch until the queue is quiescent: nothing in flight and
    /// nothing eligible. Blocked tasks stay pending.
    pub async fn run_until_idle(&self) -> GrantflowResult<()> {
        let mut settled = self.inner.settled.subscribe();
        loop {
            while let Dispatch::Started(_) = self.process_next_task()? {}
            if self.in_flight_count() == 0 {
                // A task may have settled between the scan and the count.
                if self.process_next_task()? == Dispatch::Idle && self.in_flight_count() == 0 {
                    return Ok(());
                }
                tokio::task::yield_now().await;
                continue;
            }
            settled.changed().await.map_err(|_| {
                GrantflowError::Orchestrator("settle notifications closed".to_string())
            })?;
        }
    }

    async fn run_task(
        &self,
        task: Task,
        cancel: CancellationToken,
        epoch: u64,
        permit: OwnedSemaphorePermit,
    ) {
        let config = &self.inner.config;
        let timeout = task
            .timeout_ms
            .or(config.default_task_timeout_ms)
            .map(Duration::from_millis);
        let max_retries = task.max_retries.unwrap_or(config.default_max_retries);
        let started = Instant::now();

        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            if !self.record_attempt(task.id, epoch, attempt > 1) {
                break Err(WorkerError::Cancelled);
            }
            let request = WorkerRequest {
                task_id: task.id,
                role: task.assigned_to,
                task_type: task.task_type.clone(),
                description: task.description.clone(),
                context: task.context.clone(),
                attempt,
                cancel: cancel.child_token(),
            };
            match self.invoke(request, timeout).await {
                Ok(response) => break Ok(response),
                Err(WorkerError::Cancelled) => break Err(WorkerError::Cancelled),
                Err(e) if attempt <= max_retries && !cancel.is_cancelled() => {
                    warn!(task_id = %task.id, attempt, error = %e, "Worker attempt failed, retrying");
                }
                Err(e) => break Err(e),
            }
        };

        drop(permit);
        self.settle(&task, outcome, started.elapsed(), epoch);
    }

    /// Count an attempt; false if the task belongs to a discarded epoch.
    fn record_attempt(&self, id: TaskId, epoch: u64, retry: bool) -> bool {
        let mut state = self.inner.state.lock();
        if state.epoch != epoch {
            return false;
        }
        state.queue.record_attempt(id);
        if retry {
            state.metrics.retries += 1;
        }
        true
    }

    async fn invoke(
        &self,
        request: WorkerRequest,
        timeout: Option<Duration>,
    ) -> Result<WorkerResponse, WorkerError> {
        let token = request.cancel.clone();
        let call = async {
            tokio::select! {
                result = self.inner.worker.execute(request) => result,
                () = token.cancelled() => Err(WorkerError::Cancelled),
            }
        };
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    Err(WorkerError::TimedOut(limit.as_millis() as u64))
                }
            },
            None => call.await,
        }
    }

    fn settle(
        &self,
        task: &Task,
        outcome: Result<WorkerResponse, WorkerError>,
        elapsed: Duration,
        epoch: u64,
    ) {
        let policy = self.inner.config.dependency_policy;
        let (events, follow_up) = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                debug!(task_id = %task.id, "Discarding result of a task dispatched before reset");
                return;
            }
            state.in_flight.remove(&task.id);

            let mut events = Vec::new();
            match outcome {
                Ok(response) => {
                    state.queue.mark_completed(task.id, response.output);
                    state.agents.finish_task(task.assigned_to, elapsed);
                    state.metrics.record_completion(elapsed);
                    info!(
                        task_id = %task.id,
                        role = %task.assigned_to,
                        duration_ms = elapsed.as_millis() as u64,
                        "Task completed"
                    );
                    if let Some(done) = state.queue.get(task.id) {
                        events.push(OrchestratorEvent::TaskCompleted(done.clone()));
                    }
                }
                Err(e) => {
                    state.queue.mark_failed(task.id, e.to_string());
                    state.agents.fail_task(task.assigned_to, elapsed);
                    state.metrics.record_failure();
                    error!(task_id = %task.id, role = %task.assigned_to, error = %e, "Task failed");
                    if let Some(failed) = state.queue.get(task.id) {
                        events.push(OrchestratorEvent::TaskFailed(failed.clone()));
                    }
                    if policy == DependencyPolicy::Reject {
                        for dependent in state.queue.pending_dependents(task.id) {
                            let reason = GrantflowError::DependencyUnresolved {
                                task: Some(dependent),
                                dependency: task.id.to_string(),
                                reason: UnresolvedReason::Failed,
                            };
                            if state.queue.mark_failed(dependent, reason.to_string()) {
                                state.metrics.record_failure();
                                warn!(task_id = %dependent, failed_dependency = %task.id, "Dependent task failed");
                                if let Some(t) = state.queue.get(dependent) {
                                    events.push(OrchestratorEvent::TaskFailed(t.clone()));
                                }
                            }
                        }
                    }
                }
            }
            (events, state.auto_dispatch())
        };

        for event in &events {
            self.inner.events.emit(event);
        }
        self.inner.settled.send_modify(|n| *n += 1);

        if follow_up {
            self.dispatch_ready();
        }
    }

    // --- Messages ---

    /// Archive a message, then deliver it to the addressed handler(s).
    pub fn send_message(&self, spec: MessageSpec) -> Delivery {
        let delivery = self.inner.bus.send(spec);
        debug!(
            message_id = %delivery.message.id,
            from = %delivery.message.from,
            delivered = delivery.delivered_to.len(),
            "Message sent"
        );
        self.inner
            .events
            .emit(&OrchestratorEvent::MessageSent(delivery.message.clone()));
        delivery
    }

    /// Install the handler for `role`, replacing any previous one.
    pub fn register_message_handler<F>(&self, role: AgentRole, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.bus.register(role, Arc::new(handler));
    }

    /// Remove the handler for `role`. Returns false if none was installed.
    pub fn unregister_message_handler(&self, role: AgentRole) -> bool {
        self.inner.bus.unregister(role)
    }

    // --- Shared memory ---

    /// Store an entry in shared memory, evicting the least relevant entries
    /// when over capacity.
    pub fn add_to_memory(&self, spec: MemoryEntrySpec) -> MemoryEntry {
        let entry = self.inner.state.lock().memory.add(spec);
        debug!(entry_id = %entry.id, source = %entry.source, relevance = entry.relevance, "Memory entry added");
        self.inner
            .events
            .emit(&OrchestratorEvent::MemoryAdded(entry.clone()));
        entry
    }

    /// Matching entries in the store's current order.
    pub fn query_memory(&self, filter: &MemoryFilter) -> Vec<MemoryEntry> {
        self.inner.state.lock().memory.query(filter)
    }

    // --- Events ---

    /// Subscribe to the event stream.
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&OrchestratorEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(listener)
    }

    /// Remove a listener. Returns false if it was already removed.
    pub fn off(&self, subscription: Subscription) -> bool {
        self.inner.events.off(subscription)
    }

    // --- Workflow plumbing ---

    /// The workflow being executed, with its stage and progress.
    pub fn current_workflow(&self) -> Option<CurrentWorkflow> {
        self.inner.state.lock().current_workflow.clone()
    }

    pub(crate) fn set_current_workflow(&self, workflow: Option<CurrentWorkflow>) {
        self.inner.state.lock().current_workflow = workflow;
    }

    pub(crate) fn emit(&self, event: &OrchestratorEvent) {
        self.inner.events.emit(event);
    }

    pub(crate) fn settled_receiver(&self) -> watch::Receiver<u64> {
        self.inner.settled.subscribe()
    }

    /// Number of `ids` that have not reached a terminal state.
    pub(crate) fn unfinished(&self, ids: &[TaskId]) -> usize {
        self.inner.state.lock().queue.unfinished(ids)
    }

    /// (completed, failed) counts among `ids`.
    pub(crate) fn outcome_counts(&self, ids: &[TaskId]) -> (usize, usize) {
        let state = self.inner.state.lock();
        ids.iter()
            .filter_map(|id| state.queue.get(*id))
            .fold((0, 0), |(done, failed), t| match t.status {
                TaskStatus::Completed => (done + 1, failed),
                TaskStatus::Failed => (done, failed + 1),
                _ => (done, failed),
            })
    }
}

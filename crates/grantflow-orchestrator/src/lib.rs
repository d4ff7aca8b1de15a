//! In-process task and workflow orchestration engine.
//!
//! Coordinates a fixed roster of specialized agent roles through multi-stage
//! workflows. Tasks wait in a dependency-aware queue, are dispatched to an
//! external [`Worker`] capability through a bounded executor, and report
//! progress over a synchronous event registry. Agents share a bounded,
//! relevance-ranked memory and exchange messages over a role-addressed bus.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Façade owning all engine state; cheap to clone.
//! - [`TaskQueue`]: Creation-ordered queue with dependency-gated eligibility.
//! - [`AgentRegistry`]: Per-role status, capabilities and performance.
//! - [`SharedMemory`]: Top-K-by-relevance note store.
//! - [`MessageBus`]: Point-to-point and broadcast delivery with an archive.
//! - [`WorkflowTemplate`]: Ordered stages of task templates.
//! - [`Worker`] / [`WorkerRouter`]: The seam where real work plugs in.

/// Message bus between agent roles.
pub mod bus;
/// Built-in grant workflow templates and TOML loading.
pub mod catalog;
/// Engine configuration.
pub mod config;
/// Orchestrator façade and dispatch loop.
pub mod engine;
/// Event stream types and listener registry.
pub mod events;
/// Bounded shared memory store.
pub mod memory;
/// Default per-role capability lists.
pub mod profiles;
/// Agent state registry.
pub mod registry;
/// Dependency-aware task queue.
pub mod task_queue;
/// Shared orchestration types (Task, AgentRole, AgentState, etc.).
pub mod types;
/// Worker capability seam.
pub mod worker;
/// Workflow templates and stage sequencing.
pub mod workflow;

pub use bus::{Delivery, Message, MessageBus, MessageHandler, MessageSpec, Recipient};
pub use catalog::{builtin_workflows, load_workflows, parse_workflow};
pub use config::{DependencyPolicy, Mode, OrchestratorConfig};
pub use engine::{Dispatch, MetricsReport, Orchestrator, OrchestratorState};
pub use events::{EventRegistry, OrchestratorEvent, Subscription};
pub use memory::{MemoryEntry, MemoryEntrySpec, MemoryFilter, SharedMemory};
pub use profiles::default_capabilities;
pub use registry::AgentRegistry;
pub use task_queue::TaskQueue;
pub use types::{
    AgentPerformance, AgentRole, AgentState, AgentStatus, AgentSummary, Metrics, Task, TaskId,
    TaskSpec, TaskStatus,
};
pub use worker::{Worker, WorkerError, WorkerRequest, WorkerResponse, WorkerRouter};
pub use workflow::{
    CurrentWorkflow, StageReport, StageTemplate, TaskTemplate, WorkflowReport, WorkflowTemplate,
};

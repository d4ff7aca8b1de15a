use crate::types::{AgentRole, TaskId};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One invocation of a worker capability.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub task_id: TaskId,
    pub role: AgentRole,
    pub task_type: String,
    pub description: String,
    pub context: serde_json::Value,
    /// 1 for the first try, incremented on each retry.
    pub attempt: u32,
    /// Cancelled when the attempt times out or the orchestrator is reset.
    /// `stop()` never cancels it.
    pub cancel: CancellationToken,
}

/// Successful worker output, stored as the task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub output: serde_json::Value,
}

impl WorkerResponse {
    pub fn new(output: serde_json::Value) -> Self {
        Self { output }
    }
}

/// Why a worker attempt did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}")]
    Failed(String),
    #[error("no capability registered for {role}/{task_type}")]
    Unsupported { role: AgentRole, task_type: String },
    #[error("attempt timed out after {0} ms")]
    TimedOut(u64),
    #[error("attempt cancelled")]
    Cancelled,
}

/// The external capability that performs a task's work.
///
/// Drafting, reviewing, research and the rest plug in here; the orchestrator
/// only schedules calls and records their outcome.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError>;
}

#[async_trait]
impl<W: Worker + ?Sized> Worker for Arc<W> {
    async fn execute(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        (**self).execute(request).await
    }
}

type Capability =
    Arc<dyn Fn(WorkerRequest) -> BoxFuture<'static, Result<WorkerResponse, WorkerError>> + Send + Sync>;

fn boxed<F, Fut>(handler: F) -> Capability
where
    F: Fn(WorkerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkerResponse, WorkerError>> + Send + 'static,
{
    Arc::new(move |request| handler(request).boxed())
}

/// A [`Worker`] that dispatches on `(role, task type)`.
///
/// Exact routes win; otherwise the role's fallback runs; otherwise the call
/// fails with [`WorkerError::Unsupported`].
#[derive(Default)]
pub struct WorkerRouter {
    routes: HashMap<(AgentRole, String), Capability>,
    fallbacks: HashMap<AgentRole, Capability>,
}

impl WorkerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F, Fut>(mut self, role: AgentRole, task_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(WorkerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkerResponse, WorkerError>> + Send + 'static,
    {
        self.routes.insert((role, task_type.into()), boxed(handler));
        self
    }

    /// Handler for any task type of `role` without an exact route.
    pub fn fallback<F, Fut>(mut self, role: AgentRole, handler: F) -> Self
    where
        F: Fn(WorkerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkerResponse, WorkerError>> + Send + 'static,
    {
        self.fallbacks.insert(role, boxed(handler));
        self
    }

    pub fn supports(&self, role: AgentRole, task_type: &str) -> bool {
        self.routes.contains_key(&(role, task_type.to_string())) || self.fallbacks.contains_key(&role)
    }
}

#[async_trait]
impl Worker for WorkerRouter {
    async fn execute(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let capability = self
            .routes
            .get(&(request.role, request.task_type.clone()))
            .or_else(|| self.fallbacks.get(&request.role))
            .cloned();
        match capability {
            Some(capability) => capability(request).await,
            None => Err(WorkerError::Unsupported {
                role: request.role,
                task_type: request.task_type,
            }),
        }
    }
}

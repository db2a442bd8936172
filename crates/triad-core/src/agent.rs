use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::TriadResult;

/// Invocation context handed to [`BusinessAgent::run`] on every dispatch.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Unique identifier for this dispatch, carried through logs.
    pub run_id: Uuid,
    /// When the dispatch was issued.
    pub scheduled_at: DateTime<Utc>,
    /// Free-form parameters for the unit. `Null` when the scheduler
    /// dispatches without any.
    pub params: Value,
}

impl AgentContext {
    /// Creates a context with a fresh run id and no parameters.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scheduled_at: Utc::now(),
            params: Value::Null,
        }
    }

    /// Attaches parameters to the context.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

impl Default for AgentContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The contract a runnable unit satisfies to be scheduled by the
/// orchestrator.
///
/// Implementations do one bounded cycle of work per [`run`](Self::run) call.
/// Failures returned from `run` are recorded against the unit's circuit
/// breaker and health record by the caller; they never propagate further.
#[async_trait]
pub trait BusinessAgent: Send + Sync {
    /// Registry id. Must be unique across registered units.
    fn name(&self) -> &str;

    /// Executes one work cycle and returns a serializable report.
    async fn run(&self, ctx: &AgentContext) -> TriadResult<Value>;

    /// Cheap liveness probe. Returns `false` when unhealthy; must not fail
    /// for ordinary degraded states.
    async fn health_check(&self) -> bool;

    /// Startup hook, invoked once when the unit is registered.
    fn log_startup(&self) {
        tracing::info!(agent = self.name(), "agent starting up");
    }
}

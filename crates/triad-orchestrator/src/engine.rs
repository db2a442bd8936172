use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use triad_core::{AgentContext, BusinessAgent, TriadError, TriadResult};

use crate::breaker::BreakerConfig;
use crate::recovery::RecoveryManager;
use crate::registry::AgentRegistry;
use crate::scheduler::Scheduler;
use crate::types::{AgentSnapshot, AgentState, AgentStatusDetail, RunOutcome};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Breaker settings applied to every registered unit.
    pub breaker: BreakerConfig,
    /// Deadline for a single `run()` invocation.
    pub run_timeout: Duration,
    /// Pause the restart strategy takes before swapping the breaker.
    pub restart_pause: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            run_timeout: Duration::from_secs(120),
            restart_pause: Duration::from_secs(1),
        }
    }
}

/// Registers units and drives their execution through per-unit circuit
/// breakers.
///
/// A run failure never propagates out of [`run_agent`](Self::run_agent):
/// errors, panics, and deadline overruns are all folded into the unit's
/// breaker and health record, and recovery is handed off to a background
/// task when the breaker opens. The only error the caller can see is an
/// unknown unit id.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    recovery: Arc<RecoveryManager>,
    run_timeout: Duration,
}

impl Orchestrator {
    /// Builds an engine with its own registry and the default recovery
    /// chain.
    pub fn new(config: OrchestratorConfig) -> Self {
        let registry = Arc::new(AgentRegistry::new(config.breaker.clone()));
        let recovery = Arc::new(RecoveryManager::with_pause(
            Arc::clone(&registry),
            config.restart_pause,
        ));
        Self {
            registry,
            recovery,
            run_timeout: config.run_timeout,
        }
    }

    /// Shared registry handle, for wiring the health monitor.
    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Shared recovery manager handle.
    pub fn recovery(&self) -> Arc<RecoveryManager> {
        Arc::clone(&self.recovery)
    }

    /// Registers a unit and fires its startup hook.
    ///
    /// Returns `false` without touching anything when the id is already
    /// taken.
    pub async fn register(&self, agent: Arc<dyn BusinessAgent>) -> bool {
        let id = agent.name().to_string();
        let inserted = self.registry.insert(Arc::clone(&agent)).await;
        if inserted {
            agent.log_startup();
            info!(agent = %id, "agent registered");
        } else {
            warn!(agent = %id, "agent already registered, ignoring");
        }
        inserted
    }

    /// Dispatches one run through the unit's breaker.
    ///
    /// Errors only for an unknown id. A denied admission returns
    /// [`RunOutcome::CircuitOpen`] with no side effects; a run failure,
    /// panic, or deadline expiry returns [`RunOutcome::Failed`] after the
    /// breaker and health record have absorbed it.
    pub async fn run_agent(&self, id: &str) -> TriadResult<RunOutcome> {
        let entry = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| TriadError::Orchestrator(format!("unknown agent: {id}")))?;

        {
            let mut unit = entry.unit.lock().await;
            if !unit.breaker.should_allow() {
                warn!(agent = %id, "circuit breaker open, dispatch denied");
                return Ok(RunOutcome::CircuitOpen);
            }
            unit.state = AgentState::Running;
            unit.last_active = Utc::now();
        }

        let ctx = AgentContext::new();
        info!(agent = %id, run_id = %ctx.run_id, "dispatching run");
        let started = Instant::now();
        // A panic inside the agent surfaces here as a JoinError, not an
        // unwind past the bookkeeping below.
        let agent = Arc::clone(&entry.agent);
        let run_ctx = ctx.clone();
        let mut task = tokio::spawn(async move { agent.run(&run_ctx).await });
        let result = match tokio::time::timeout(self.run_timeout, &mut task).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(join_err)) => Err(TriadError::Agent(format!("run panicked: {join_err}"))),
            Err(_) => {
                task.abort();
                Err(TriadError::Agent(format!(
                    "run exceeded its {:.0}s deadline",
                    self.run_timeout.as_secs_f64()
                )))
            }
        };
        let elapsed = started.elapsed();

        let mut unit = entry.unit.lock().await;
        unit.last_active = Utc::now();
        match result {
            Ok(report) => {
                unit.breaker.record_success();
                unit.health.record(true, elapsed);
                unit.state = AgentState::Idle;
                drop(unit);
                info!(
                    agent = %id,
                    run_id = %ctx.run_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "run completed"
                );
                Ok(RunOutcome::Completed { report })
            }
            Err(err) => {
                unit.breaker.record_failure();
                unit.health.record(false, elapsed);
                let opened = unit.breaker.is_open();
                unit.state = if opened {
                    AgentState::Failed
                } else {
                    AgentState::Idle
                };
                drop(unit);
                error!(agent = %id, run_id = %ctx.run_id, error = %err, "run failed");
                if opened {
                    warn!(agent = %id, "circuit breaker opened, handing off to recovery");
                    let recovery = Arc::clone(&self.recovery);
                    let agent_id = id.to_string();
                    tokio::spawn(async move {
                        let _ = recovery.recover(&agent_id).await;
                    });
                }
                Ok(RunOutcome::Failed {
                    error: err.to_string(),
                })
            }
        }
    }

    /// Read-only snapshot of every unit, ordered by id.
    pub async fn list_agents(&self) -> Vec<AgentSnapshot> {
        self.registry.snapshot().await
    }

    /// Full status detail for one unit, or `None` when unknown.
    pub async fn agent_status(&self, id: &str) -> Option<AgentStatusDetail> {
        let entry = self.registry.get(id).await?;
        let unit = entry.unit.lock().await;
        Some(AgentStatusDetail {
            id: id.to_string(),
            state: unit.state,
            last_active: unit.last_active,
            healthy: unit.state != AgentState::Failed && unit.health.is_stable(Utc::now()),
            metrics: unit.health.snapshot(),
            breaker: unit.breaker.snapshot(),
        })
    }

    /// Spawns the interval scheduling loop over this engine.
    ///
    /// The loop dispatches every eligible unit once per `interval` and runs
    /// until the shutdown signal fires.
    pub fn schedule(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        Scheduler::new(Arc::clone(self), interval).spawn(shutdown)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SteadyAgent {
        name: &'static str,
        runs: AtomicU32,
    }

    impl SteadyAgent {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                runs: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BusinessAgent for SteadyAgent {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: &AgentContext) -> TriadResult<Value> {
            let count = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "runs": count }))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct BrokenAgent {
        name: &'static str,
        attempts: AtomicU32,
    }

    impl BrokenAgent {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BusinessAgent for BrokenAgent {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: &AgentContext) -> TriadResult<Value> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TriadError::Agent("simulated outage".into()))
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    struct SlowAgent;

    #[async_trait]
    impl BusinessAgent for SlowAgent {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self, _ctx: &AgentContext) -> TriadResult<Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Null)
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct ExplodingAgent;

    #[async_trait]
    impl BusinessAgent for ExplodingAgent {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn run(&self, _ctx: &AgentContext) -> TriadResult<Value> {
            panic!("boom");
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn slow_recovery_config() -> OrchestratorConfig {
        // A long restart pause keeps the opened breaker observable.
        OrchestratorConfig {
            restart_pause: Duration::from_secs(30),
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        assert!(orchestrator.register(Arc::new(SteadyAgent::new("a"))).await);
        assert!(!orchestrator.register(Arc::new(SteadyAgent::new("a"))).await);
        assert_eq!(orchestrator.list_agents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_an_error() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        assert!(orchestrator.run_agent("ghost").await.is_err());
        assert!(orchestrator.agent_status("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_successful_run_updates_unit() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let agent = Arc::new(SteadyAgent::new("steady"));
        orchestrator.register(agent).await;

        let outcome = orchestrator.run_agent("steady").await.unwrap();
        assert!(outcome.is_completed());

        let status = orchestrator.agent_status("steady").await.unwrap();
        assert_eq!(status.state, AgentState::Idle);
        assert!(status.healthy);
        assert_eq!(status.metrics.error_count, 0);
        assert!(status.metrics.last_success.is_some());
        assert_eq!(status.breaker.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_opens_then_denies_dispatch() {
        let orchestrator = Orchestrator::new(slow_recovery_config());
        let broken = Arc::new(BrokenAgent::new("broken"));
        orchestrator.register(Arc::clone(&broken) as Arc<dyn BusinessAgent>).await;

        for _ in 0..3 {
            let outcome = orchestrator.run_agent("broken").await.unwrap();
            assert!(matches!(outcome, RunOutcome::Failed { .. }));
        }
        assert_eq!(broken.attempts.load(Ordering::SeqCst), 3);

        // The restart pause is still running, so the old breaker denies.
        let outcome = orchestrator.run_agent("broken").await.unwrap();
        assert!(outcome.is_circuit_open());
        assert_eq!(broken.attempts.load(Ordering::SeqCst), 3);

        let status = orchestrator.agent_status("broken").await.unwrap();
        assert_eq!(status.breaker.state, BreakerState::Open);
        assert!(!status.healthy);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_recorded_as_failure() {
        let orchestrator = Orchestrator::new(OrchestratorConfig {
            run_timeout: Duration::from_millis(50),
            ..slow_recovery_config()
        });
        orchestrator.register(Arc::new(SlowAgent)).await;

        let outcome = orchestrator.run_agent("slow").await.unwrap();
        match outcome {
            RunOutcome::Failed { error } => assert!(error.contains("deadline")),
            other => panic!("expected a failed outcome, got {other:?}"),
        }

        let status = orchestrator.agent_status("slow").await.unwrap();
        assert_eq!(status.metrics.error_count, 1);
        assert_eq!(status.metrics.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_panicking_run_is_recorded_as_failure() {
        let orchestrator = Orchestrator::new(slow_recovery_config());
        orchestrator.register(Arc::new(ExplodingAgent)).await;

        let outcome = orchestrator.run_agent("exploding").await.unwrap();
        match outcome {
            RunOutcome::Failed { error } => assert!(error.contains("panicked")),
            other => panic!("expected a failed outcome, got {other:?}"),
        }

        let status = orchestrator.agent_status("exploding").await.unwrap();
        assert_eq!(status.state, AgentState::Idle);
        assert_eq!(status.metrics.error_count, 1);
        assert_eq!(status.metrics.consecutive_failures, 1);
        assert!(status.metrics.success_rate < 1.0);
        assert_eq!(status.breaker.failure_count, 1);
    }

    #[tokio::test]
    async fn test_recovery_reopens_dispatch_after_restart() {
        let orchestrator = Orchestrator::new(OrchestratorConfig {
            breaker: BreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(300),
            },
            restart_pause: Duration::from_millis(10),
            ..OrchestratorConfig::default()
        });
        let broken = Arc::new(BrokenAgent::new("flaky"));
        orchestrator.register(broken).await;

        let outcome = orchestrator.run_agent("flaky").await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        // Background restart finishes well within this window.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = orchestrator.agent_status("flaky").await.unwrap();
        assert_eq!(status.state, AgentState::Idle);
        assert_eq!(status.breaker.state, BreakerState::Closed);
        assert_eq!(status.breaker.failure_count, 0);
    }
}

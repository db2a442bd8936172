//! End-to-end orchestration test.
//!
//! Drives real agents through the registry, breaker, scheduler, monitor, and
//! recovery chain together. Checks: per-unit failure isolation across ticks,
//! breaker-driven eligibility, recovery restoring dispatch, and clean
//! shutdown of every background loop.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use triad_agents::{HeartbeatAgent, PipelineAgent};
use triad_core::{AgentContext, BusinessAgent, TriadError, TriadResult};
use triad_orchestrator::*;

// ---------------------------------------------------------------------------
// Scripted agent that fails its first N runs, then succeeds forever.
// ---------------------------------------------------------------------------

struct ScriptedAgent {
    name: &'static str,
    fail_first: u32,
    alive: bool,
    calls: AtomicU32,
}

impl ScriptedAgent {
    fn steady(name: &'static str) -> Self {
        Self {
            name,
            fail_first: 0,
            alive: true,
            calls: AtomicU32::new(0),
        }
    }

    fn doomed(name: &'static str) -> Self {
        Self {
            name,
            fail_first: u32::MAX,
            alive: false,
            calls: AtomicU32::new(0),
        }
    }

    fn flaky(name: &'static str) -> Self {
        Self {
            name,
            fail_first: 1,
            alive: true,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusinessAgent for ScriptedAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _ctx: &AgentContext) -> TriadResult<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            Err(TriadError::Agent(format!("scripted failure on call {call}")))
        } else {
            Ok(json!({ "call": call }))
        }
    }

    async fn health_check(&self) -> bool {
        self.alive
    }
}

fn engine_with(restart_pause: Duration, failure_threshold: u32) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(OrchestratorConfig {
        breaker: BreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(300),
        },
        restart_pause,
        ..OrchestratorConfig::default()
    }))
}

// ---------------------------------------------------------------------------
// Test: one failing unit never drags its siblings down
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_partial_failure_isolation() {
    let orchestrator = engine_with(Duration::from_secs(30), 3);
    let first = Arc::new(ScriptedAgent::steady("first"));
    let second = Arc::new(ScriptedAgent::steady("second"));
    let doomed = Arc::new(ScriptedAgent::doomed("doomed"));
    for agent in [&first, &second, &doomed] {
        assert!(orchestrator.register(Arc::clone(agent) as Arc<dyn BusinessAgent>).await);
    }

    let scheduler = Scheduler::new(Arc::clone(&orchestrator), Duration::from_secs(60));

    // Three ticks exhaust the doomed unit's breaker threshold.
    for _ in 0..3 {
        assert_eq!(scheduler.tick().await, 3);
    }
    assert_eq!(doomed.calls(), 3);
    assert_eq!(first.calls(), 3);
    assert_eq!(second.calls(), 3);

    let status = orchestrator.agent_status("doomed").await.unwrap();
    assert_eq!(status.state, AgentState::Failed);
    assert_eq!(status.breaker.state, BreakerState::Open);
    assert!(!status.healthy);

    // The failed unit drops out of the next tick; siblings keep running.
    assert_eq!(scheduler.tick().await, 2);
    assert_eq!(doomed.calls(), 3);
    assert_eq!(first.calls(), 4);
    assert_eq!(second.calls(), 4);
}

// ---------------------------------------------------------------------------
// Test: recovery restores dispatch after a breaker opens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_recovery_restores_dispatch() {
    let orchestrator = engine_with(Duration::from_millis(10), 1);
    let flaky = Arc::new(ScriptedAgent::flaky("flaky"));
    orchestrator.register(Arc::clone(&flaky) as Arc<dyn BusinessAgent>).await;

    let outcome = orchestrator.run_agent("flaky").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed { .. }));

    // The background restart swaps in a fresh breaker.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = orchestrator.agent_status("flaky").await.unwrap();
    assert_eq!(status.state, AgentState::Idle);
    assert_eq!(status.breaker.state, BreakerState::Closed);
    assert_eq!(status.breaker.failure_count, 0);

    let outcome = orchestrator.run_agent("flaky").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(flaky.calls(), 2);
}

// ---------------------------------------------------------------------------
// Test: reference agents flow reports back through the engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_reference_agents_report() {
    let orchestrator = engine_with(Duration::from_secs(1), 3);
    let heartbeat = Arc::new(HeartbeatAgent::new("pulse"));
    let pipeline = Arc::new(PipelineAgent::new("etl", ["extract", "transform", "load"]).unwrap());
    orchestrator.register(Arc::clone(&heartbeat) as Arc<dyn BusinessAgent>).await;
    orchestrator.register(Arc::clone(&pipeline) as Arc<dyn BusinessAgent>).await;

    let scheduler = Scheduler::new(Arc::clone(&orchestrator), Duration::from_secs(60));
    assert_eq!(scheduler.tick().await, 2);
    assert_eq!(scheduler.tick().await, 2);
    assert_eq!(heartbeat.beats(), 2);
    assert_eq!(pipeline.completed_runs(), 2);

    match orchestrator.run_agent("etl").await.unwrap() {
        RunOutcome::Completed { report } => {
            assert_eq!(report["pipeline"], "etl");
            assert_eq!(report["completed_runs"], 3);
        }
        other => panic!("expected a completed run, got {other:?}"),
    }

    for snapshot in orchestrator.list_agents().await {
        assert_eq!(snapshot.state, AgentState::Idle);
    }
}

// ---------------------------------------------------------------------------
// Test: monitor escalates a dead unit while loops keep running
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_monitor_escalation_and_shutdown() {
    let orchestrator = engine_with(Duration::from_millis(5), 3);
    let steady = Arc::new(ScriptedAgent::steady("steady"));
    let dead = Arc::new(ScriptedAgent::doomed("dead"));
    orchestrator.register(Arc::clone(&steady) as Arc<dyn BusinessAgent>).await;
    orchestrator.register(Arc::clone(&dead) as Arc<dyn BusinessAgent>).await;

    let monitor = Arc::new(HealthMonitor::with_config(
        orchestrator.registry(),
        orchestrator.recovery(),
        MonitorConfig {
            interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(50),
        },
    ));

    let (tx, _) = broadcast::channel(4);
    let mut handles = monitor.spawn_all(&tx).await;
    handles.push(orchestrator.schedule(Duration::from_millis(20), tx.subscribe()));

    tokio::time::sleep(Duration::from_millis(120)).await;
    tx.send(()).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("background loop should stop on shutdown")
            .unwrap();
    }

    // The steady unit kept running the whole time.
    assert!(steady.calls() >= 2);

    // Let any restart spawned by the final tick finish its pause.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The dead unit was escalated and restarted rather than left Failed.
    let status = orchestrator.agent_status("dead").await.unwrap();
    assert_eq!(status.state, AgentState::Idle);
}

// ---------------------------------------------------------------------------
// Test: status detail carries the full reporting payload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_status_detail_payload() {
    let orchestrator = engine_with(Duration::from_secs(1), 3);
    orchestrator.register(Arc::new(ScriptedAgent::steady("steady"))).await;
    orchestrator.run_agent("steady").await.unwrap();

    let status = orchestrator.agent_status("steady").await.unwrap();
    let payload = serde_json::to_value(&status).unwrap();

    assert_eq!(payload["id"], "steady");
    assert_eq!(payload["state"], "idle");
    assert_eq!(payload["healthy"], true);
    assert_eq!(payload["metrics"]["error_count"], 0);
    assert!(payload["metrics"]["success_rate"].as_f64().unwrap() > 0.99);
    assert_eq!(payload["breaker"]["state"], "closed");
    assert!(payload["last_active"].is_string());
}

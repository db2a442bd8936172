//! Resilient multi-agent orchestration engine.
//!
//! Registers business agent units behind a shared registry, dispatches their
//! runs through per-unit circuit breakers, probes their liveness, and walks a
//! restart/failover/shutdown recovery chain when a unit goes bad. One failing
//! unit never takes down a scheduler tick or a sibling's dispatch.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Top-level engine that registers units and drives their runs.
//! - [`AgentRegistry`] — Shared map of units with per-unit locked state.
//! - [`CircuitBreaker`] — Closed/Open/HalfOpen admission gate with a single-probe trial.
//! - [`HealthMetrics`] — Smoothed success-rate and latency record per unit.
//! - [`RecoveryManager`] — Ordered restart → failover → graceful-shutdown chain.
//! - [`HealthMonitor`] — Per-unit liveness probe loop.
//! - [`Scheduler`] — Fixed-interval concurrent dispatch loop.

/// Circuit breaker admission gate.
pub mod breaker;
/// Orchestration engine and run dispatch.
pub mod engine;
/// Smoothed per-unit health metrics.
pub mod health;
/// Per-unit liveness probing.
pub mod monitor;
/// Ordered recovery strategy chain.
pub mod recovery;
/// Shared unit registry.
pub mod registry;
/// Fixed-interval dispatch loop.
pub mod scheduler;
/// Shared orchestration types (states, snapshots, outcomes).
pub mod types;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use engine::{Orchestrator, OrchestratorConfig};
pub use health::{HealthMetrics, HealthSnapshot};
pub use monitor::{HealthMonitor, MonitorConfig};
pub use recovery::{RecoveryManager, RecoveryOutcome, RecoveryStrategy, StrategyOutcome};
pub use registry::{AgentEntry, AgentRegistry, UnitState};
pub use scheduler::Scheduler;
pub use types::{AgentSnapshot, AgentState, AgentStatusDetail, RunOutcome};

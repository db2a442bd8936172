use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::breaker::BreakerSnapshot;
use crate::health::HealthSnapshot;

/// Lifecycle state of a registered unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Registered and eligible for dispatch.
    Idle,
    /// A run is in flight.
    Running,
    /// The circuit breaker opened; recovery is pending or exhausted.
    Failed,
    /// A recovery strategy is working on the unit.
    Recovering,
    /// Gracefully shut down; never dispatched again.
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Running => "running",
            AgentState::Failed => "failed",
            AgentState::Recovering => "recovering",
            AgentState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// One row of the read-only registry snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    /// Unit id.
    pub id: String,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Last dispatch or completion time.
    pub last_active: DateTime<Utc>,
}

/// Full per-unit detail served to status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusDetail {
    /// Unit id.
    pub id: String,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Last dispatch or completion time.
    pub last_active: DateTime<Utc>,
    /// Strict per-unit health verdict (state, rates, recency combined).
    pub healthy: bool,
    /// Rolling health averages.
    pub metrics: HealthSnapshot,
    /// Circuit breaker view.
    pub breaker: BreakerSnapshot,
}

/// Result of a single dispatch attempt.
///
/// A failed run is an ordinary outcome here, not an error: it has already
/// been folded into the unit's breaker and health record by the time the
/// caller sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run finished; `report` is the unit's own output.
    Completed {
        /// Serialized report returned by the unit.
        report: Value,
    },
    /// Admission was denied by an open breaker. No state was touched.
    CircuitOpen,
    /// The run failed or timed out.
    Failed {
        /// Rendered error message.
        error: String,
    },
}

impl RunOutcome {
    /// True when the run completed and produced a report.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    /// True when the breaker denied admission.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RunOutcome::CircuitOpen)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_matches_serde() {
        let json = serde_json::to_string(&AgentState::Recovering).unwrap();
        assert_eq!(json, "\"recovering\"");
        assert_eq!(AgentState::Recovering.to_string(), "recovering");
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = RunOutcome::CircuitOpen;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "circuit_open");
        assert!(outcome.is_circuit_open());
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use triad_core::BusinessAgent;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::health::HealthMetrics;
use crate::types::{AgentSnapshot, AgentState};

/// Mutable per-unit fields. Only touched while holding the entry's lock.
#[derive(Debug)]
pub struct UnitState {
    /// Lifecycle state.
    pub state: AgentState,
    /// Last dispatch or completion time.
    pub last_active: DateTime<Utc>,
    /// Failure gate for this unit.
    pub breaker: CircuitBreaker,
    /// Rolling health record for this unit.
    pub health: HealthMetrics,
}

/// One registered unit: the immutable handle plus its guarded state.
pub struct AgentEntry {
    /// The unit implementation.
    pub agent: Arc<dyn BusinessAgent>,
    /// Per-unit lock serializing the scheduler, monitor, and recovery.
    pub unit: Mutex<UnitState>,
}

/// Registry of all units, shared by the engine, the health monitor, and the
/// recovery manager.
///
/// The map itself is read-locked for lookups; per-unit mutation happens
/// under each entry's own lock so one slow unit never blocks the others.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentEntry>>>,
    breaker_config: BreakerConfig,
}

impl AgentRegistry {
    /// Creates an empty registry. Newly inserted units get a breaker built
    /// from `breaker_config`.
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            breaker_config,
        }
    }

    /// Inserts a unit in the `Idle` state.
    ///
    /// Returns `false` and leaves the existing entry untouched when the id
    /// is already present.
    pub async fn insert(&self, agent: Arc<dyn BusinessAgent>) -> bool {
        let id = agent.name().to_string();
        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            return false;
        }
        let entry = AgentEntry {
            agent,
            unit: Mutex::new(UnitState {
                state: AgentState::Idle,
                last_active: Utc::now(),
                breaker: CircuitBreaker::new(self.breaker_config.clone()),
                health: HealthMetrics::default(),
            }),
        };
        agents.insert(id, Arc::new(entry));
        true
    }

    /// Looks up one unit.
    pub async fn get(&self, id: &str) -> Option<Arc<AgentEntry>> {
        self.agents.read().await.get(id).cloned()
    }

    /// Registered ids, unordered.
    pub async fn ids(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    /// Number of registered units.
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// True when nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Read-only snapshot of every unit, ordered by id.
    pub async fn snapshot(&self) -> Vec<AgentSnapshot> {
        let agents = self.agents.read().await;
        let mut out = Vec::with_capacity(agents.len());
        for (id, entry) in agents.iter() {
            let unit = entry.unit.lock().await;
            out.push(AgentSnapshot {
                id: id.clone(),
                state: unit.state,
                last_active: unit.last_active,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Breaker settings applied to new and restarted units.
    pub fn breaker_config(&self) -> &BreakerConfig {
        &self.breaker_config
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::registry::AgentRegistry;
use crate::types::AgentState;

/// What a single recovery strategy reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The unit was brought back to a runnable or terminal-safe state.
    Recovered,
    /// The strategy is intentionally not implemented.
    NotImplemented,
    /// The strategy ran and failed.
    Failed(String),
}

/// Result of a full pass over the strategy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// A strategy succeeded.
    Recovered {
        /// Name of the strategy that succeeded.
        strategy: &'static str,
    },
    /// Every strategy failed; the unit stays `Failed`.
    Exhausted,
}

/// One remediation step in the ordered chain.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Strategy name used in logs and outcomes.
    fn name(&self) -> &'static str;

    /// Attempts to remediate the unit.
    async fn attempt(&self, id: &str, registry: &AgentRegistry) -> StrategyOutcome;
}

/// Pauses briefly, swaps in a fresh breaker, and returns the unit to `Idle`.
pub struct RestartStrategy {
    /// Settle time before the breaker swap.
    pub pause: Duration,
}

#[async_trait]
impl RecoveryStrategy for RestartStrategy {
    fn name(&self) -> &'static str {
        "restart"
    }

    async fn attempt(&self, id: &str, registry: &AgentRegistry) -> StrategyOutcome {
        let Some(entry) = registry.get(id).await else {
            return StrategyOutcome::Failed(format!("unknown agent: {id}"));
        };
        {
            let mut unit = entry.unit.lock().await;
            unit.state = AgentState::Recovering;
        }
        tokio::time::sleep(self.pause).await;

        let mut unit = entry.unit.lock().await;
        unit.breaker = CircuitBreaker::new(registry.breaker_config().clone());
        unit.state = AgentState::Idle;
        info!(agent = %id, "agent restarted with a fresh breaker");
        StrategyOutcome::Recovered
    }
}

/// Routing to a backup instance. Reserved; always reports
/// [`StrategyOutcome::NotImplemented`].
pub struct FailoverStrategy;

#[async_trait]
impl RecoveryStrategy for FailoverStrategy {
    fn name(&self) -> &'static str {
        "failover"
    }

    async fn attempt(&self, _id: &str, _registry: &AgentRegistry) -> StrategyOutcome {
        StrategyOutcome::NotImplemented
    }
}

/// Last resort: parks the unit in `Stopped`, out of the scheduler's reach.
pub struct GracefulShutdownStrategy;

#[async_trait]
impl RecoveryStrategy for GracefulShutdownStrategy {
    fn name(&self) -> &'static str {
        "graceful_shutdown"
    }

    async fn attempt(&self, id: &str, registry: &AgentRegistry) -> StrategyOutcome {
        let Some(entry) = registry.get(id).await else {
            return StrategyOutcome::Failed(format!("unknown agent: {id}"));
        };
        let mut unit = entry.unit.lock().await;
        unit.state = AgentState::Stopped;
        info!(agent = %id, "agent shut down after failed recovery attempts");
        StrategyOutcome::Recovered
    }
}

/// Walks an ordered strategy chain until one succeeds.
///
/// The default chain is restart, then failover, then graceful shutdown.
/// A distinct log line is emitted for unimplemented strategies so their
/// presence in the chain stays visible.
pub struct RecoveryManager {
    registry: Arc<AgentRegistry>,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl RecoveryManager {
    /// Default chain with a one-second restart pause.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self::with_pause(registry, Duration::from_secs(1))
    }

    /// Default chain with the given restart pause.
    pub fn with_pause(registry: Arc<AgentRegistry>, pause: Duration) -> Self {
        Self::with_strategies(
            registry,
            vec![
                Box::new(RestartStrategy { pause }),
                Box::new(FailoverStrategy),
                Box::new(GracefulShutdownStrategy),
            ],
        )
    }

    /// Custom chain, tried in the given order.
    pub fn with_strategies(
        registry: Arc<AgentRegistry>,
        strategies: Vec<Box<dyn RecoveryStrategy>>,
    ) -> Self {
        Self {
            registry,
            strategies,
        }
    }

    /// Runs the chain for one unit, stopping at the first success.
    pub async fn recover(&self, id: &str) -> RecoveryOutcome {
        info!(agent = %id, "starting recovery");
        for strategy in &self.strategies {
            match strategy.attempt(id, &self.registry).await {
                StrategyOutcome::Recovered => {
                    info!(agent = %id, strategy = strategy.name(), "recovery succeeded");
                    return RecoveryOutcome::Recovered {
                        strategy: strategy.name(),
                    };
                }
                StrategyOutcome::NotImplemented => {
                    warn!(
                        agent = %id,
                        strategy = strategy.name(),
                        "recovery strategy not implemented, trying next"
                    );
                }
                StrategyOutcome::Failed(reason) => {
                    warn!(
                        agent = %id,
                        strategy = strategy.name(),
                        reason = %reason,
                        "recovery strategy failed, trying next"
                    );
                }
            }
        }
        error!(agent = %id, "recovery exhausted, agent remains failed");
        RecoveryOutcome::Exhausted
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::recovery::RecoveryManager;
use crate::registry::AgentRegistry;
use crate::types::AgentState;

/// Probe cadence and deadline.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sleep between consecutive probes of one unit.
    pub interval: Duration,
    /// Deadline for a single `health_check()` call.
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Periodic liveness prober.
///
/// Each registered unit gets its own loop. A probe that fails or misses its
/// deadline escalates straight to the recovery chain; degraded unit metrics
/// do the same. A probe can never take the loop down.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    recovery: Arc<RecoveryManager>,
    config: MonitorConfig,
}

impl HealthMonitor {
    pub fn new(registry: Arc<AgentRegistry>, recovery: Arc<RecoveryManager>) -> Self {
        Self::with_config(registry, recovery, MonitorConfig::default())
    }

    pub fn with_config(
        registry: Arc<AgentRegistry>,
        recovery: Arc<RecoveryManager>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            recovery,
            config,
        }
    }

    /// Probes one unit once.
    ///
    /// Returns `None` when the unit is gone or Stopped, which tells the
    /// loop to end. Otherwise returns whether the unit passed, after any
    /// recovery escalation has finished. A probe that panics or overruns
    /// its deadline counts as failed.
    pub async fn probe_once(&self, id: &str) -> Option<bool> {
        let entry = self.registry.get(id).await?;
        {
            let unit = entry.unit.lock().await;
            if unit.state == AgentState::Stopped {
                return None;
            }
        }

        let agent = Arc::clone(&entry.agent);
        let mut task = tokio::spawn(async move { agent.health_check().await });
        let probe = match tokio::time::timeout(self.config.probe_timeout, &mut task).await {
            Ok(joined) => joined.unwrap_or(false),
            Err(_) => {
                task.abort();
                false
            }
        };

        let healthy = {
            let unit = entry.unit.lock().await;
            unit.state != AgentState::Failed && probe && unit.health.is_healthy()
        };

        if healthy {
            debug!(agent = %id, "health probe passed");
        } else {
            warn!(agent = %id, probe, "health probe failed, escalating to recovery");
            let _ = self.recovery.recover(id).await;
        }
        Some(healthy)
    }

    /// Spawns the probe loop for one unit.
    pub fn spawn_unit(self: &Arc<Self>, id: String, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            debug!(agent = %id, "health monitor loop started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    () = tokio::time::sleep(monitor.config.interval) => {
                        if monitor.probe_once(&id).await.is_none() {
                            break;
                        }
                    }
                }
            }
            debug!(agent = %id, "health monitor loop stopped");
        })
    }

    /// Spawns one probe loop per currently registered unit.
    pub async fn spawn_all(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let ids = self.registry.ids().await;
        ids.into_iter()
            .map(|id| self.spawn_unit(id, shutdown.subscribe()))
            .collect()
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::Orchestrator;
use crate::types::AgentState;

/// Fixed-interval dispatch loop over every eligible unit.
///
/// Each tick dispatches all units not in Failed or Stopped concurrently and
/// waits for the whole batch before sleeping. A failing or panicking unit
/// never affects its siblings' dispatches; neither does a breaker denial.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Ids of units the next tick would dispatch.
    pub async fn eligible(&self) -> Vec<String> {
        self.orchestrator
            .list_agents()
            .await
            .into_iter()
            .filter(|snapshot| {
                snapshot.state != AgentState::Failed && snapshot.state != AgentState::Stopped
            })
            .map(|snapshot| snapshot.id)
            .collect()
    }

    /// Runs one tick: dispatches every eligible unit concurrently and waits
    /// for all of them.
    ///
    /// Returns how many dispatches produced an outcome. The engine absorbs
    /// run panics into failed outcomes, so those still count.
    pub async fn tick(&self) -> usize {
        let ids = self.eligible().await;
        if ids.is_empty() {
            debug!("no eligible agents this tick");
            return 0;
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let orchestrator = Arc::clone(&self.orchestrator);
                tokio::spawn(async move {
                    let outcome = orchestrator.run_agent(&id).await;
                    (id, outcome)
                })
            })
            .collect();

        let mut dispatched = 0;
        for joined in join_all(handles).await {
            match joined {
                Ok((id, Ok(outcome))) => {
                    dispatched += 1;
                    debug!(agent = %id, ?outcome, "tick dispatch finished");
                }
                Ok((id, Err(err))) => {
                    warn!(agent = %id, error = %err, "tick dispatch rejected");
                }
                Err(err) => {
                    error!(error = %err, "agent task panicked");
                }
            }
        }
        dispatched
    }

    /// Spawns the perpetual tick loop.
    ///
    /// The loop ticks, sleeps `interval`, and repeats until the shutdown
    /// signal fires. Returns the handle so the caller can await or abort it.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_s = self.interval.as_secs_f64(), "scheduler loop started");
            loop {
                let dispatched = self.tick().await;
                debug!(dispatched, "scheduler tick finished");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
            info!("scheduler loop stopped");
        })
    }
}

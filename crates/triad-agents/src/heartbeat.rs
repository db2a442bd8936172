use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use triad_core::{AgentContext, BusinessAgent, TriadResult};

/// Minimal always-available unit that emits a beat counter on every run.
///
/// Useful as a liveness baseline: if heartbeats stop arriving, the scheduler
/// itself is stuck, not any business unit. Operators can pin named
/// milestones to it so notable moments show up next to the beat count.
pub struct HeartbeatAgent {
    name: String,
    beats: AtomicU64,
    milestones: Mutex<Vec<String>>,
}

impl HeartbeatAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            beats: AtomicU64::new(0),
            milestones: Mutex::new(Vec::new()),
        }
    }

    /// Number of beats emitted so far.
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    /// Records a named milestone against the current beat count.
    pub fn record_milestone(&self, milestone: impl Into<String>) {
        let milestone = milestone.into();
        tracing::info!(
            agent = %self.name,
            beat = self.beats(),
            milestone = %milestone,
            "milestone recorded"
        );
        self.milestones.lock().push(milestone);
    }

    pub fn milestones(&self) -> Vec<String> {
        self.milestones.lock().clone()
    }
}

impl Default for HeartbeatAgent {
    fn default() -> Self {
        Self::new("heartbeat")
    }
}

#[async_trait]
impl BusinessAgent for HeartbeatAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &AgentContext) -> TriadResult<Value> {
        let beat = self.beats.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(agent = %self.name, beat, "heartbeat");
        Ok(json!({
            "beat": beat,
            "milestones": self.milestones.lock().len(),
            "scheduled_at": ctx.scheduled_at.to_rfc3339(),
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

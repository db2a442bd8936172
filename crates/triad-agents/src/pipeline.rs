use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;
use triad_core::{AgentContext, BusinessAgent, TriadError, TriadResult};

/// How many finished run ids the agent keeps for inspection.
const RECENT_RUNS_CAP: usize = 32;

/// Reference unit that pushes a batch of items through fixed pipeline
/// stages on every run.
///
/// Stands in for a real business vertical: the batch comes from the run
/// context's `items` parameter when present, otherwise a synthetic batch is
/// used so scheduled runs always have work. Counters only ever grow, which
/// makes the agent a convenient probe for scheduling liveness.
pub struct PipelineAgent {
    name: String,
    stages: Vec<String>,
    processed_items: AtomicU64,
    completed_runs: AtomicU64,
    recent: Mutex<Vec<String>>,
}

impl PipelineAgent {
    /// Builds a pipeline unit; fails on an empty stage list.
    pub fn new(
        name: impl Into<String>,
        stages: impl IntoIterator<Item = impl Into<String>>,
    ) -> TriadResult<Self> {
        let name = name.into();
        let stages: Vec<String> = stages.into_iter().map(Into::into).collect();
        if stages.is_empty() {
            return Err(TriadError::Agent(format!(
                "pipeline agent '{name}' needs at least one stage"
            )));
        }
        Ok(Self {
            name,
            stages,
            processed_items: AtomicU64::new(0),
            completed_runs: AtomicU64::new(0),
            recent: Mutex::new(Vec::new()),
        })
    }

    /// Run ids of the most recent completed runs, oldest first.
    pub fn recent_runs(&self) -> Vec<String> {
        self.recent.lock().clone()
    }

    /// Items pushed through the pipeline since startup.
    pub fn processed_items(&self) -> u64 {
        self.processed_items.load(Ordering::SeqCst)
    }

    pub fn completed_runs(&self) -> u64 {
        self.completed_runs.load(Ordering::SeqCst)
    }
}

fn batch_from(params: &Value) -> Vec<String> {
    match params.get("items").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .map(|item| match item.as_str() {
                Some(text) => text.to_string(),
                None => item.to_string(),
            })
            .collect(),
        None => vec!["scheduled-batch".to_string()],
    }
}

#[async_trait]
impl BusinessAgent for PipelineAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &AgentContext) -> TriadResult<Value> {
        let batch = batch_from(&ctx.params);
        for stage in &self.stages {
            debug!(
                agent = %self.name,
                run_id = %ctx.run_id,
                stage = %stage,
                items = batch.len(),
                "stage finished"
            );
        }
        let processed = self
            .processed_items
            .fetch_add(batch.len() as u64, Ordering::SeqCst)
            + batch.len() as u64;
        let completed = self.completed_runs.fetch_add(1, Ordering::SeqCst) + 1;

        let mut recent = self.recent.lock();
        recent.push(ctx.run_id.to_string());
        if recent.len() > RECENT_RUNS_CAP {
            recent.remove(0);
        }
        drop(recent);

        Ok(json!({
            "pipeline": self.name,
            "stages_completed": self.stages,
            "batch": batch,
            "processed_items": processed,
            "completed_runs": completed,
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn log_startup(&self) {
        tracing::info!(
            agent = %self.name,
            stages = self.stages.len(),
            "pipeline agent starting up"
        );
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use triad_agents::{HeartbeatAgent, PipelineAgent};
use triad_core::BusinessAgent;
use triad_monitoring::{InteractionTracker, MetricsCollector, RateLimiter};
use triad_orchestrator::{
    BreakerConfig, HealthMonitor, MonitorConfig, Orchestrator, OrchestratorConfig,
};

/// Idle bound for dropping rate-limit windows during maintenance.
const RATE_WINDOW_MAX_IDLE: Duration = Duration::from_secs(3600);

#[derive(Parser)]
#[command(name = "triad", about = "Triad - resilient multi-agent orchestration service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "triad.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestration service
    Serve {
        /// Scheduler interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Inspect the registered agents
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },
}

#[derive(Subcommand)]
enum AgentsAction {
    /// List the agents the service registers at startup
    List,
}

#[derive(Debug, Deserialize, Default)]
struct AppConfig {
    #[serde(default)]
    orchestrator: OrchestratorSection,
    #[serde(default)]
    monitoring: MonitoringSection,
    #[serde(default)]
    agents: AgentsSection,
}

#[derive(Debug, Deserialize)]
struct OrchestratorSection {
    #[serde(default = "default_failure_threshold")]
    failure_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    recovery_timeout_seconds: u64,
    #[serde(default = "default_run_timeout")]
    run_timeout_seconds: u64,
    #[serde(default = "default_restart_pause")]
    restart_pause_seconds: u64,
    #[serde(default = "default_schedule_interval")]
    schedule_interval_seconds: u64,
}

impl OrchestratorSection {
    fn engine_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            breaker: BreakerConfig {
                failure_threshold: self.failure_threshold,
                recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
            },
            run_timeout: Duration::from_secs(self.run_timeout_seconds),
            restart_pause: Duration::from_secs(self.restart_pause_seconds),
        }
    }
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
            run_timeout_seconds: default_run_timeout(),
            restart_pause_seconds: default_restart_pause(),
            schedule_interval_seconds: default_schedule_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MonitoringSection {
    #[serde(default = "default_health_interval")]
    health_check_interval_seconds: u64,
    #[serde(default = "default_probe_timeout")]
    health_probe_timeout_seconds: u64,
    #[serde(default = "default_metrics_interval")]
    metrics_interval_seconds: u64,
    #[serde(default = "default_maintenance_interval")]
    maintenance_interval_seconds: u64,
}

impl MonitoringSection {
    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.health_check_interval_seconds),
            probe_timeout: Duration::from_secs(self.health_probe_timeout_seconds),
        }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: default_health_interval(),
            health_probe_timeout_seconds: default_probe_timeout(),
            metrics_interval_seconds: default_metrics_interval(),
            maintenance_interval_seconds: default_maintenance_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentsSection {
    #[serde(default = "default_pipeline_stages")]
    pipeline_stages: Vec<String>,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            pipeline_stages: default_pipeline_stages(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_recovery_timeout() -> u64 {
    300
}
fn default_run_timeout() -> u64 {
    120
}
fn default_restart_pause() -> u64 {
    1
}
fn default_schedule_interval() -> u64 {
    10
}
fn default_health_interval() -> u64 {
    60
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_metrics_interval() -> u64 {
    60
}
fn default_maintenance_interval() -> u64 {
    300
}
fn default_pipeline_stages() -> Vec<String> {
    vec![
        "extract".to_string(),
        "transform".to_string(),
        "load".to_string(),
    ]
}

/// Reads the config file, falling back to defaults when it does not exist.
async fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(AppConfig::default());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {e}", path.display()))?;
    let config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display()))?;
    Ok(config)
}

/// Periodically drops idle rate-limit windows and expired user sessions.
fn spawn_maintenance(
    rate_limiter: Arc<RateLimiter>,
    tracker: Arc<InteractionTracker>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(interval_s = interval.as_secs_f64(), "maintenance loop started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(interval) => {
                    let windows = rate_limiter.cleanup(RATE_WINDOW_MAX_IDLE).await;
                    let sessions = tracker.cleanup_expired_sessions();
                    if windows > 0 || sessions > 0 {
                        info!(windows, sessions, "maintenance pass removed idle entries");
                    }
                }
            }
        }
        debug!("maintenance loop stopped");
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Serve { interval } => {
            let schedule_interval = Duration::from_secs(
                interval.unwrap_or(config.orchestrator.schedule_interval_seconds),
            );
            info!(
                interval_s = schedule_interval.as_secs(),
                "starting triad orchestration service"
            );

            let orchestrator = Arc::new(Orchestrator::new(config.orchestrator.engine_config()));
            let heartbeat = Arc::new(HeartbeatAgent::new("heartbeat"));
            let pipeline = Arc::new(PipelineAgent::new(
                "pipeline",
                config.agents.pipeline_stages.clone(),
            )?);
            if !orchestrator
                .register(Arc::clone(&heartbeat) as Arc<dyn BusinessAgent>)
                .await
            {
                anyhow::bail!("duplicate agent id: heartbeat");
            }
            if !orchestrator
                .register(Arc::clone(&pipeline) as Arc<dyn BusinessAgent>)
                .await
            {
                anyhow::bail!("duplicate agent id: pipeline");
            }

            let collector = Arc::new(MetricsCollector::new());
            let rate_limiter = Arc::new(RateLimiter::new());
            let tracker = Arc::new(InteractionTracker::new());
            let monitor = Arc::new(HealthMonitor::with_config(
                orchestrator.registry(),
                orchestrator.recovery(),
                config.monitoring.monitor_config(),
            ));

            let (shutdown_tx, _) = broadcast::channel(8);
            let mut handles = monitor.spawn_all(&shutdown_tx).await;
            handles.push(collector.spawn(
                Duration::from_secs(config.monitoring.metrics_interval_seconds),
                shutdown_tx.subscribe(),
            ));
            handles.push(orchestrator.schedule(schedule_interval, shutdown_tx.subscribe()));
            handles.push(spawn_maintenance(
                Arc::clone(&rate_limiter),
                Arc::clone(&tracker),
                Duration::from_secs(config.monitoring.maintenance_interval_seconds),
                shutdown_tx.subscribe(),
            ));

            heartbeat.record_milestone("service started");
            info!(
                agents = orchestrator.list_agents().await.len(),
                loops = handles.len(),
                "triad service running, press ctrl-c to stop"
            );

            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received, stopping background loops");
            let _ = shutdown_tx.send(());
            for handle in handles {
                handle.await?;
            }
            info!("all background loops stopped");
        }
        Commands::Agents { action } => match action {
            AgentsAction::List => {
                let stages = &config.agents.pipeline_stages;
                println!("Registered agents:");
                println!("  heartbeat - operations heartbeat, counts beats and milestones");
                println!(
                    "  pipeline - staged pipeline over {} stage(s): {}",
                    stages.len(),
                    stages.join(", ")
                );
                println!("\nTotal: 2 agent(s)");
            }
        },
    }

    Ok(())
}

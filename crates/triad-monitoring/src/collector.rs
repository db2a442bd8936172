use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, Process, ProcessesToUpdate, System};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Oldest samples are dropped beyond this.
const HISTORY_CAP: usize = 1000;
/// Samples required before predictions are computed.
const REGRESSION_WINDOW: usize = 60;
/// How many samples ahead predictions extrapolate.
const PREDICTION_HORIZON: usize = 60;
const TOP_PROCESS_COUNT: usize = 5;

const CPU_ALERT_THRESHOLD: f64 = 80.0;
const MEMORY_ALERT_THRESHOLD: f64 = 85.0;
const DISK_ALERT_THRESHOLD: f64 = 90.0;
const CPU_CRITICAL_THRESHOLD: f64 = 90.0;
const MEMORY_CRITICAL_THRESHOLD: f64 = 90.0;
const DISK_CRITICAL_THRESHOLD: f64 = 95.0;
const PREDICTION_WARN_THRESHOLD: f64 = 90.0;

/// One sampled view of host resource usage.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetricsSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_usage_by_path: HashMap<String, f64>,
    pub open_files: u64,
    pub connections: u64,
    /// Extrapolated cpu/memory percentages one horizon ahead, when enough
    /// history exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_next_window: Option<HashMap<String, f64>>,
}

/// A current sample crossing an alert threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    HighCpu(f64),
    HighMemory(f64),
    HighDisk { path: String, percent: f64 },
}

/// Coarse status reported to the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    /// No sample collected yet.
    Unknown,
}

/// Classification result plus any prediction warnings.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<SystemMetricsSample>,
}

/// Samples host resources on a fixed cadence, keeps a bounded history, and
/// flags anomalies against the current sample.
///
/// The history is the only shared state and sits behind a single mutex, so
/// concurrent readers of current metrics and history see consistent
/// snapshots. Anomaly handlers are diagnostic only: they name the top
/// resource consumers in the log and never touch the offending processes.
pub struct MetricsCollector {
    history: Mutex<VecDeque<SystemMetricsSample>>,
    system: Mutex<System>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            system: Mutex::new(System::new()),
        }
    }

    /// Reads one live sample from the host.
    pub fn sample_host(&self) -> SystemMetricsSample {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();
        let cpu_percent = f64::from(system.global_cpu_usage());
        let memory_percent = if system.total_memory() == 0 {
            0.0
        } else {
            system.used_memory() as f64 / system.total_memory() as f64 * 100.0
        };
        drop(system);

        let disks = Disks::new_with_refreshed_list();
        let mut disk_usage_by_path = HashMap::new();
        for disk in disks.list() {
            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            let used = total.saturating_sub(disk.available_space());
            disk_usage_by_path.insert(
                disk.mount_point().to_string_lossy().into_owned(),
                used as f64 / total as f64 * 100.0,
            );
        }

        let (open_files, connections) = process_descriptor_counts();
        SystemMetricsSample {
            timestamp: Utc::now(),
            cpu_percent,
            memory_percent,
            disk_usage_by_path,
            open_files,
            connections,
            predicted_next_window: None,
        }
    }

    /// Appends a sample to the history and reports threshold crossings.
    ///
    /// Once enough history exists, the stored sample is annotated with
    /// predictions extrapolated one horizon ahead and clamped to `[0, 100]`.
    pub fn record_sample(&self, sample: SystemMetricsSample) -> Vec<Anomaly> {
        let anomalies = anomalies_in(&sample);

        let mut history = self.history.lock();
        if history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(sample);

        if history.len() >= REGRESSION_WINDOW {
            let start = history.len() - REGRESSION_WINDOW;
            let cpu: Vec<f64> = history.iter().skip(start).map(|s| s.cpu_percent).collect();
            let memory: Vec<f64> = history.iter().skip(start).map(|s| s.memory_percent).collect();
            let mut predicted = HashMap::new();
            predicted.insert(
                "cpu_percent".to_string(),
                linear_trend(&cpu, PREDICTION_HORIZON).clamp(0.0, 100.0),
            );
            predicted.insert(
                "memory_percent".to_string(),
                linear_trend(&memory, PREDICTION_HORIZON).clamp(0.0, 100.0),
            );
            if let Some(last) = history.back_mut() {
                last.predicted_next_window = Some(predicted);
            }
        }

        anomalies
    }

    /// Logs the top resource consumers for each reported anomaly.
    pub fn handle_anomalies(&self, anomalies: &[Anomaly]) {
        if anomalies.is_empty() {
            return;
        }
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);
        for anomaly in anomalies {
            match anomaly {
                Anomaly::HighCpu(percent) => {
                    warn!(cpu_percent = percent, "cpu usage above threshold");
                    log_top_processes(&system, "cpu", |p| f64::from(p.cpu_usage()));
                }
                Anomaly::HighMemory(percent) => {
                    warn!(memory_percent = percent, "memory usage above threshold");
                    log_top_processes(&system, "memory", |p| p.memory() as f64);
                }
                Anomaly::HighDisk { path, percent } => {
                    warn!(path = %path, disk_percent = percent, "disk usage above threshold");
                    log_top_processes(&system, "disk io", |p| {
                        let io = p.disk_usage();
                        (io.total_written_bytes + io.total_read_bytes) as f64
                    });
                }
            }
        }
    }

    /// Most recent sample, if any.
    pub fn current_metrics(&self) -> Option<SystemMetricsSample> {
        self.history.lock().back().cloned()
    }

    /// Samples recorded within the last `window_minutes`.
    pub fn metrics_history(&self, window_minutes: u32) -> Vec<SystemMetricsSample> {
        let cutoff = Utc::now() - chrono::Duration::minutes(i64::from(window_minutes));
        self.history
            .lock()
            .iter()
            .filter(|sample| sample.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Classifies the current sample for the health surface.
    ///
    /// Predictions above the warning threshold add warnings without changing
    /// the status. A critical status schedules the diagnostic handlers off
    /// this call path.
    pub fn classify(self: &Arc<Self>) -> HealthReport {
        let Some(sample) = self.current_metrics() else {
            return HealthReport {
                status: HealthStatus::Unknown,
                warnings: Vec::new(),
                sample: None,
            };
        };

        let max_disk = sample
            .disk_usage_by_path
            .values()
            .copied()
            .fold(0.0_f64, f64::max);
        let status = if sample.cpu_percent > CPU_CRITICAL_THRESHOLD
            || sample.memory_percent > MEMORY_CRITICAL_THRESHOLD
            || max_disk > DISK_CRITICAL_THRESHOLD
        {
            HealthStatus::Critical
        } else if sample.cpu_percent > CPU_ALERT_THRESHOLD
            || sample.memory_percent > MEMORY_ALERT_THRESHOLD
            || max_disk > DISK_ALERT_THRESHOLD
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let mut warnings = Vec::new();
        if let Some(predicted) = &sample.predicted_next_window {
            for (metric, value) in predicted {
                if *value > PREDICTION_WARN_THRESHOLD {
                    warnings.push(format!(
                        "{metric} predicted to reach {value:.1}% within the next window"
                    ));
                }
            }
        }

        if status == HealthStatus::Critical {
            error!(
                cpu_percent = sample.cpu_percent,
                memory_percent = sample.memory_percent,
                max_disk_percent = max_disk,
                "system resources critical, scheduling diagnostics"
            );
            let collector = Arc::clone(self);
            let anomalies = anomalies_in(&sample);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn_blocking(move || collector.handle_anomalies(&anomalies));
            } else {
                collector.handle_anomalies(&anomalies);
            }
        }

        HealthReport {
            status,
            warnings,
            sample: Some(sample),
        }
    }

    /// Spawns the sampling loop.
    ///
    /// The first sample is taken right away, so current metrics are
    /// available without waiting out an interval.
    pub fn spawn(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_s = interval.as_secs_f64(), "metrics collector loop started");
            loop {
                let sampler = Arc::clone(&collector);
                let sampled = tokio::task::spawn_blocking(move || {
                    let sample = sampler.sample_host();
                    let anomalies = sampler.record_sample(sample);
                    sampler.handle_anomalies(&anomalies);
                    anomalies.len()
                })
                .await;
                match sampled {
                    Ok(0) => debug!("sample recorded"),
                    Ok(found) => warn!(found, "sample recorded with anomalies"),
                    Err(err) => error!(error = %err, "metrics sampling task failed"),
                }
                tokio::select! {
                    _ = shutdown.recv() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            info!("metrics collector loop stopped");
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn anomalies_in(sample: &SystemMetricsSample) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    if sample.cpu_percent > CPU_ALERT_THRESHOLD {
        anomalies.push(Anomaly::HighCpu(sample.cpu_percent));
    }
    if sample.memory_percent > MEMORY_ALERT_THRESHOLD {
        anomalies.push(Anomaly::HighMemory(sample.memory_percent));
    }
    for (path, percent) in &sample.disk_usage_by_path {
        if *percent > DISK_ALERT_THRESHOLD {
            anomalies.push(Anomaly::HighDisk {
                path: path.clone(),
                percent: *percent,
            });
        }
    }
    anomalies
}

/// Least-squares fit over `values` indexed from zero, evaluated
/// `steps_ahead` past the last index.
fn linear_trend(values: &[f64], steps_ahead: usize) -> f64 {
    let n = values.len() as f64;
    if values.is_empty() {
        return 0.0;
    }
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return values[values.len() - 1];
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    intercept + slope * (n - 1.0 + steps_ahead as f64)
}

fn log_top_processes<F>(system: &System, resource: &str, metric: F)
where
    F: Fn(&Process) -> f64,
{
    let mut processes: Vec<(u32, String, f64)> = system
        .processes()
        .values()
        .map(|p| {
            (
                p.pid().as_u32(),
                p.name().to_string_lossy().into_owned(),
                metric(p),
            )
        })
        .collect();
    processes.sort_by(|a, b| b.2.total_cmp(&a.2));
    for (pid, name, value) in processes.into_iter().take(TOP_PROCESS_COUNT) {
        info!(pid, name = %name, value, resource, "top resource consumer");
    }
}

#[cfg(target_os = "linux")]
fn process_descriptor_counts() -> (u64, u64) {
    let Ok(entries) = std::fs::read_dir("/proc/self/fd") else {
        return (0, 0);
    };
    let mut open_files = 0;
    let mut connections = 0;
    for entry in entries.flatten() {
        open_files += 1;
        if let Ok(target) = std::fs::read_link(entry.path()) {
            if target.to_string_lossy().starts_with("socket:") {
                connections += 1;
            }
        }
    }
    (open_files, connections)
}

#[cfg(not(target_os = "linux"))]
fn process_descriptor_counts() -> (u64, u64) {
    (0, 0)
}

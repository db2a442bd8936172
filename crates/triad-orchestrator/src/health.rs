use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Smoothing factor for the exponential moving averages.
const SMOOTHING_ALPHA: f64 = 0.1;

/// Rolling health record owned by exactly one unit.
///
/// Success rate and response time are exponential moving averages so a
/// single slow or failed run shifts them by a tenth of the observation.
/// Not internally synchronized; callers mutate it under the unit's lock.
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    /// Smoothed success rate in `[0, 1]`. Starts at 1.0.
    pub success_rate: f64,
    /// Smoothed response time in seconds. Starts at 0.0.
    pub avg_response_time: f64,
    /// Total failed attempts since registration.
    pub error_count: u32,
    /// Failed attempts since the last success.
    pub consecutive_failures: u32,
    /// Completion time of the most recent successful run.
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_response_time: 0.0,
            error_count: 0,
            consecutive_failures: 0,
            last_success: None,
        }
    }
}

impl HealthMetrics {
    /// Folds one run attempt into the averages and counters.
    pub fn record(&mut self, success: bool, elapsed: Duration) {
        let observed = if success { 1.0 } else { 0.0 };
        self.success_rate = SMOOTHING_ALPHA * observed + (1.0 - SMOOTHING_ALPHA) * self.success_rate;
        self.avg_response_time =
            SMOOTHING_ALPHA * elapsed.as_secs_f64() + (1.0 - SMOOTHING_ALPHA) * self.avg_response_time;
        if success {
            self.consecutive_failures = 0;
            self.last_success = Some(Utc::now());
        } else {
            self.error_count += 1;
            self.consecutive_failures += 1;
        }
    }

    /// Monitor-level health rule: acceptable success rate and error volume.
    pub fn is_healthy(&self) -> bool {
        self.success_rate >= 0.8 && self.error_count < 5
    }

    /// Stricter per-unit rule used for status reporting: additionally
    /// requires a short failure streak and a success within the last hour.
    /// A unit that has never run yet passes.
    pub fn is_stable(&self, now: DateTime<Utc>) -> bool {
        self.is_healthy()
            && self.consecutive_failures < 3
            && self
                .last_success
                .map_or(true, |at| (now - at).num_seconds() < 3600)
    }

    /// Serializable view.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            success_rate: self.success_rate,
            avg_response_time_seconds: self.avg_response_time,
            error_count: self.error_count,
            consecutive_failures: self.consecutive_failures,
            last_success: self.last_success,
        }
    }
}

/// Serializable health view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Smoothed success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Smoothed response time in seconds.
    pub avg_response_time_seconds: f64,
    /// Total failed attempts.
    pub error_count: u32,
    /// Failed attempts since the last success.
    pub consecutive_failures: u32,
    /// Completion time of the most recent successful run.
    pub last_success: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_optimistic() {
        let metrics = HealthMetrics::default();
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.avg_response_time, 0.0);
        assert!(metrics.is_healthy());
        assert!(metrics.is_stable(Utc::now()));
    }

    #[test]
    fn test_single_failure_shifts_rate_by_alpha() {
        let mut metrics = HealthMetrics::default();
        metrics.record(false, Duration::from_millis(100));
        assert!((metrics.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.consecutive_failures, 1);
    }

    #[test]
    fn test_ema_converges_after_sustained_success() {
        let mut metrics = HealthMetrics {
            success_rate: 0.5,
            ..HealthMetrics::default()
        };
        for _ in 0..50 {
            metrics.record(true, Duration::from_millis(10));
        }
        assert!(metrics.success_rate > 0.99);
        assert_eq!(metrics.consecutive_failures, 0);
        assert!(metrics.last_success.is_some());
    }

    #[test]
    fn test_unhealthy_below_rate_floor() {
        let mut metrics = HealthMetrics::default();
        // Seven straight failures drag 1.0 under 0.8 (0.9^7 ≈ 0.478) and
        // push the error count past its ceiling.
        for _ in 0..7 {
            metrics.record(false, Duration::from_millis(10));
        }
        assert!(metrics.success_rate < 0.8);
        assert!(!metrics.is_healthy());
    }

    #[test]
    fn test_stability_requires_recent_success() {
        let mut metrics = HealthMetrics::default();
        metrics.record(true, Duration::from_millis(10));
        assert!(metrics.is_stable(Utc::now()));
        let later = Utc::now() + chrono::Duration::seconds(7200);
        assert!(!metrics.is_stable(later));
    }

    #[test]
    fn test_response_time_smoothing() {
        let mut metrics = HealthMetrics::default();
        metrics.record(true, Duration::from_secs(2));
        assert!((metrics.avg_response_time - 0.2).abs() < 1e-9);
        metrics.record(true, Duration::from_secs(2));
        assert!((metrics.avg_response_time - 0.38).abs() < 1e-9);
    }
}

use std::time::{Duration, Instant};

use serde::Serialize;

/// Circuit breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures required to open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a recovery probe.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(300),
        }
    }
}

/// Admission state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Requests are admitted normally.
    Closed,
    /// Requests are denied until the recovery timeout elapses.
    Open,
    /// The single recovery probe is in flight; everyone else is denied.
    HalfOpen,
}

/// Serializable breaker view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Current admission state.
    pub state: BreakerState,
    /// Failures counted toward the threshold.
    pub failure_count: u32,
    /// Seconds since the most recent failure, if any.
    pub seconds_since_last_failure: Option<f64>,
}

/// Per-unit failure gate with timed half-open recovery.
///
/// After `failure_threshold` consecutive failures the breaker opens and
/// denies admission. Once `recovery_timeout` has passed since the last
/// failure, exactly one caller is admitted as a probe: its success closes
/// the breaker, its failure reopens it and restarts the timer.
///
/// The breaker is owned by exactly one unit and is not internally
/// synchronized; callers mutate it while holding the unit's lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    /// Creates a closed breaker with the given settings.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }

    /// Admission check, potentially transitioning the breaker.
    ///
    /// Returns `true` when the caller may dispatch. While open, the first
    /// check after the recovery timeout wins the half-open probe and resets
    /// the failure count; concurrent checks during that probe are denied.
    pub fn should_allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let timed_out = self
                    .last_failure
                    .map_or(true, |at| at.elapsed() > self.config.recovery_timeout);
                if timed_out {
                    self.state = BreakerState::HalfOpen;
                    self.failure_count = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => false,
        }
    }

    /// Records a successful run and closes the breaker.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = BreakerState::Closed;
    }

    /// Records a failed run.
    ///
    /// Opens the breaker at the threshold; a failure while half-open
    /// reopens it immediately. Either way the recovery timer restarts.
    pub fn record_failure(&mut self) {
        self.last_failure = Some(Instant::now());
        self.failure_count += 1;
        match self.state {
            BreakerState::HalfOpen => self.state = BreakerState::Open,
            _ => {
                if self.failure_count >= self.config.failure_threshold {
                    self.state = BreakerState::Open;
                }
            }
        }
    }

    /// Current admission state.
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// True when the breaker denies regular admission.
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Failures counted toward the threshold.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Serializable view.
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            seconds_since_last_failure: self.last_failure.map(|at| at.elapsed().as_secs_f64()),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn quick_breaker(timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = quick_breaker(60_000);
        for _ in 0..2 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        // Fourth admission attempt before the timeout is denied.
        assert!(!breaker.should_allow());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = quick_breaker(60_000);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_single_probe_after_timeout() {
        let mut breaker = quick_breaker(50);
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.should_allow());

        std::thread::sleep(Duration::from_millis(80));
        // Exactly one caller wins the probe, with a clean count.
        assert!(breaker.should_allow());
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.should_allow());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.should_allow());
    }

    #[test]
    fn test_failed_probe_reopens_and_restarts_timer() {
        let mut breaker = quick_breaker(50);
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(80));
        assert!(breaker.should_allow());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.should_allow());

        std::thread::sleep(Duration::from_millis(80));
        assert!(breaker.should_allow());
    }

    #[test]
    fn test_failures_while_open_restart_timer() {
        let mut breaker = quick_breaker(50);
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        breaker.record_failure();
        // The earlier failures are stale but the latest one is not.
        std::thread::sleep(Duration::from_millis(30));
        assert!(!breaker.should_allow());
    }

    #[test]
    fn test_snapshot_reports_state() {
        let mut breaker = quick_breaker(60_000);
        breaker.record_failure();
        let snap = breaker.snapshot();
        assert_eq!(snap.state, BreakerState::Closed);
        assert_eq!(snap.failure_count, 1);
        assert!(snap.seconds_since_last_failure.unwrap() < 1.0);
    }
}

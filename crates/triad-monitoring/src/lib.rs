//! Observability services for the Triad platform.
//!
//! Provides sliding-window rate limiting, host resource sampling with
//! anomaly detection, and user interaction tracking. Each service owns its
//! state behind a single lock and exposes only serializable snapshots, so
//! the surrounding layers never share mutable internals.
//!
//! # Main types
//!
//! - [`RateLimiter`] — Sliding-window request gate with exponential backoff.
//! - [`MetricsCollector`] — Resource sampling loop with trend prediction and
//!   anomaly handlers.
//! - [`InteractionTracker`] — Per-session user activity store with
//!   rage-click detection.

/// Host resource sampling and anomaly detection.
pub mod collector;
/// Sliding-window rate limiting.
pub mod rate_limit;
/// User interaction tracking.
pub mod tracker;

pub use collector::{Anomaly, HealthReport, HealthStatus, MetricsCollector, SystemMetricsSample};
pub use rate_limit::{RateLimitConfig, RateLimiter, RemainingQuota};
pub use tracker::{ActionRecord, InteractionTracker, SessionSummary};

//! Core types and error definitions for the Triad platform.
//!
//! This crate provides the foundational types shared across all Triad crates:
//! the unified error enum and the contract every runnable unit implements so
//! the orchestrator can schedule it.
//!
//! # Main types
//!
//! - [`TriadError`] — Unified error enum for all Triad subsystems.
//! - [`TriadResult`] — Convenience alias for `Result<T, TriadError>`.
//! - [`BusinessAgent`] — The contract a runnable unit satisfies.
//! - [`AgentContext`] — Per-dispatch invocation context.

/// The runnable-unit contract and its invocation context.
pub mod agent;

pub use agent::{AgentContext, BusinessAgent};

// --- Error types ---

/// Top-level error type for the Triad platform.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum TriadError {
    /// An error raised by a unit's `run` or `health_check`.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error from the orchestration engine (unknown unit, dispatch
    /// bookkeeping).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error raised while remediating a failed unit.
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// An error from the monitoring subsystem.
    #[error("Monitoring error: {0}")]
    Monitoring(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`TriadError`].
pub type TriadResult<T> = Result<T, TriadError>;

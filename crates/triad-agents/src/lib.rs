//! Reference agent units for the orchestration engine.
//!
//! These are deliberately small units used to exercise the engine end to
//! end: a heartbeat that never fails and a staged pipeline that drains item
//! batches through a fixed list of stages.

/// Liveness baseline unit.
pub mod heartbeat;
/// Staged pipeline reference unit.
pub mod pipeline;

pub use heartbeat::HeartbeatAgent;
pub use pipeline::PipelineAgent;

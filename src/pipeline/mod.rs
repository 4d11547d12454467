//! # Pipeline Runtime
//!
//! Bounded-queue staged dataflow. Each stage consumes integer task indices
//! from its queue and forwards them downstream on completion. Worker-pool
//! stages run N threads; a pinned stage runs on whatever thread calls
//! `run()`, for resources with thread affinity (GPU contexts).

pub mod queue;
pub mod stage;

pub use queue::BoundedQueue;
pub use stage::{chain, PinnedStage, PipelineStage, Stage};

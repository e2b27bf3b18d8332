//! Memory channel programming
//!
//! - `plan`: what to program and the per-channel progress record
//! - `controller`: drives the commit sequence through the engine

pub mod controller;
pub mod plan;

pub use controller::ChannelProgrammer;
pub use plan::{
    ApplyProgress, ChannelFailure, ChannelPlan, ChannelStatus, FailureReason, MemoryChannel,
    PlanStatus, ProgressEvent, Rollback, VfoRestore, WriteStage,
};

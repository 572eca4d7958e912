//! Generic driver that applies a per-frame operation across a sequence.
//!
//! Commands describe their work as a [`SequenceOperation`] over a
//! [`FrameSource`]; [`run_sequence`] schedules the frames over a worker
//! pool and streams results through the ordered sequence writer.

pub mod config;
pub mod driver;
pub mod hooks;
pub mod types;

pub use config::{FrameSelection, MemoryBudget, ProcessConfig};
pub use driver::{run_sequence, ProcessArgs};
pub use hooks::{default_memory_limits, FrameSource, SequenceOperation};
pub use types::{NoOpReporter, ProgressReporter, RunOutcome, RunReport};

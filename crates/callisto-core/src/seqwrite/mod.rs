//! Ordered sequence output with bounded memory.
//!
//! Frames are produced by a pool of worker threads in whatever order they
//! finish, but sequence formats want their frames appended front to back.
//! [`SequenceWriter`] runs a dedicated thread that buffers out-of-order
//! frames and forwards them to a [`SequenceSink`] strictly by index.
//! [`MemoryGate`] caps how many frames may be in flight at once so the
//! reorder buffer cannot grow without bound.

pub mod memory;
pub mod sink;
pub mod writer;

pub use memory::{MemoryGate, OutputId};
pub use sink::{GeometryPolicy, SequenceSink};
pub use writer::{SequenceWriter, WriteOutcome};

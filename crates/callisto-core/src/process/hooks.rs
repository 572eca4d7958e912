use crate::consts::WRITER_QUEUE_FACTOR;
use crate::error::Result;
use crate::frame::{ImageBuffer, Rect};

use super::config::ProcessConfig;
use super::types::RunReport;

/// Random access to the frames of a sequence.
pub trait FrameSource: Send + Sync {
    fn frame_count(&self) -> usize;

    fn read_frame(&self, index: usize) -> Result<ImageBuffer>;

    /// Approximate memory footprint of one decoded frame, in bytes.
    fn frame_cost_bytes(&self) -> usize;
}

/// One per-frame operation applied across a sequence.
///
/// Implementations only provide `describe` and `process_frame`; the other
/// hooks have defaults that fit operations working on one frame at a time.
pub trait SequenceOperation: Send + Sync {
    /// Short name for logs and progress output.
    fn describe(&self) -> &str;

    /// Called once before any frame is processed.
    fn prepare(&self, _source: &dyn FrameSource) -> Result<()> {
        Ok(())
    }

    /// Transform one frame. `out_index` is the position in the output
    /// sequence, `in_index` the frame in the source.
    fn process_frame(
        &self,
        out_index: usize,
        in_index: usize,
        image: ImageBuffer,
        area: Option<Rect>,
    ) -> Result<ImageBuffer>;

    /// Peak bytes needed while processing one frame, input included.
    fn memory_per_frame(&self, source: &dyn FrameSource) -> usize {
        2 * source.frame_cost_bytes()
    }

    /// How many frames fit in the memory budget at once.
    ///
    /// With `for_writer` set the answer is for frames in flight towards the
    /// sequence writer, otherwise for concurrently processing threads.
    /// Zero means not even one frame fits and the run must be refused.
    fn memory_limits(
        &self,
        source: &dyn FrameSource,
        config: &ProcessConfig,
        for_writer: bool,
    ) -> usize {
        default_memory_limits(self.memory_per_frame(source), config, for_writer)
    }

    /// Called once after the writer has stopped, with the final report.
    fn finalize(&self, _report: &RunReport) -> Result<()> {
        Ok(())
    }
}

/// Frame budget from dividing the memory budget by per-frame cost.
///
/// Worker limits are capped at the thread count; writer limits at
/// [`WRITER_QUEUE_FACTOR`] queued frames per thread.
pub fn default_memory_limits(
    per_frame_bytes: usize,
    config: &ProcessConfig,
    for_writer: bool,
) -> usize {
    let per_frame = per_frame_bytes.max(1);
    let fit = config.memory.budget_bytes() / per_frame;
    if fit == 0 {
        return 0;
    }
    let threads = config.effective_threads();
    if for_writer {
        fit.min(threads * WRITER_QUEUE_FACTOR)
    } else {
        fit.min(threads)
    }
}

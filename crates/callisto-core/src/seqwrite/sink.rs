use crate::error::Result;
use crate::frame::ImageBuffer;

/// How strictly a sink binds frame geometry to the first frame it sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryPolicy {
    /// All frames must share the width and height of the first frame.
    Fixed,
    /// Frames may vary in width and height.
    Flexible,
}

/// Destination for an ordered stream of frames.
///
/// The sequence writer calls `write_frame` with strictly ascending
/// positions starting at 0, with no gaps; skipped source frames are
/// compacted out before the sink sees them. Implementations can therefore
/// append blindly.
pub trait SequenceSink {
    /// Geometry policy the writer enforces before frames reach this sink.
    fn geometry(&self) -> GeometryPolicy;

    /// Append one frame at the given output position.
    fn write_frame(&mut self, image: &ImageBuffer, position: usize) -> Result<()>;

    /// Flush and close the output. Called exactly once, also after errors.
    fn finish(self) -> Result<()>;
}

/// Progress callbacks for long-running sequence operations.
///
/// `advance` is called from worker threads with the total number of frames
/// finished so far, which is monotonic but arrives from racing threads.
pub trait ProgressReporter: Send + Sync {
    fn begin(&self, _description: &str, _total: usize) {}
    fn advance(&self, _frames_done: usize) {}
    fn finish(&self) {}
}

/// Reporter that ignores all progress.
pub struct NoOpReporter;

impl ProgressReporter for NoOpReporter {}

/// How a processing run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every selected frame was accounted for and the output is complete.
    Completed,
    /// The run was cancelled or frames were left unwritten.
    Incomplete,
}

/// Summary of one processing run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Frames written to the output sequence.
    pub frames_written: usize,
    /// Frames that failed to read or process.
    pub frames_failed: usize,
    /// Frames selected for processing.
    pub selected: usize,
}

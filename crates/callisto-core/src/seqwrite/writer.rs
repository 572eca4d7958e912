use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, unbounded, Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::error::{CallistoError, Result};
use crate::frame::{FrameFormat, ImageBuffer};

use super::memory::{MemoryGate, OutputId};
use super::sink::{GeometryPolicy, SequenceSink};

struct PendingWrite {
    index: usize,
    /// `None` marks a hole: a source frame that produced no output.
    image: Option<ImageBuffer>,
}

enum WriterMessage {
    Task(PendingWrite),
    Flush,
}

enum Popped {
    Task(PendingWrite),
    Flush,
    Abort,
    Closed,
}

enum Ending {
    /// All expected frames were accounted for.
    Done,
    /// Abort was signalled; pending frames are discarded.
    Aborted,
    /// Producers finished without reaching a known count.
    Flushed,
}

/// Result of a sequence write run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Frames actually written to the sink.
    pub frames_written: usize,
    /// Frame count declared up front, if any.
    pub expected: Option<usize>,
    /// Frames submitted but discarded before reaching the sink.
    pub lost: usize,
    /// Whether every submitted or expected frame was accounted for.
    pub complete: bool,
}

/// Accepts frames in arbitrary order and writes them to a sink in strict
/// index order from a dedicated thread.
///
/// Workers submit frames (or holes) with [`append_write`](Self::append_write)
/// as they finish, in any order. The writer thread buffers out-of-order
/// frames and forwards them to the [`SequenceSink`] front to back, releasing
/// one [`MemoryGate`] slot per frame as it goes. [`stop`](Self::stop) joins
/// the thread and returns the final accounting.
pub struct SequenceWriter {
    tasks: Sender<WriterMessage>,
    abort: Sender<()>,
    failed: Arc<AtomicBool>,
    handle: JoinHandle<Result<WriteOutcome>>,
}

impl SequenceWriter {
    /// Spawn the writer thread for `sink`.
    ///
    /// `expected` is the number of source frames that will be submitted,
    /// counting holes; pass `None` when the total is not known up front.
    pub fn start<S>(sink: S, expected: Option<usize>, gate: Arc<MemoryGate>) -> Self
    where
        S: SequenceSink + Send + 'static,
    {
        let (tasks_tx, tasks_rx) = unbounded();
        let (abort_tx, abort_rx) = unbounded();
        let failed = Arc::new(AtomicBool::new(false));
        let output = gate.allocate_output_id();

        let thread_failed = Arc::clone(&failed);
        let handle = thread::spawn(move || {
            writer_loop(sink, expected, gate, output, tasks_rx, abort_rx, thread_failed)
        });

        Self {
            tasks: tasks_tx,
            abort: abort_tx,
            failed,
            handle,
        }
    }

    /// Submit the frame at `index`, or a hole when `image` is `None`.
    ///
    /// Fails with [`CallistoError::WriterUnavailable`] once the writer has
    /// hit an error, so producers can stop early instead of filling a dead
    /// queue.
    pub fn append_write(&self, image: Option<ImageBuffer>, index: usize) -> Result<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(CallistoError::WriterUnavailable);
        }
        self.tasks
            .send(WriterMessage::Task(PendingWrite { index, image }))
            .map_err(|_| CallistoError::WriterUnavailable)
    }

    /// Signal the writer to discard pending frames and stop.
    ///
    /// The signal jumps ahead of frames already queued. Call
    /// [`stop`](Self::stop) afterwards to join and collect the outcome.
    pub fn abort(&self) {
        let _ = self.abort.send(());
    }

    /// Whether the writer thread has failed. Producers should poll this and
    /// stop submitting once it turns true.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Stop the writer and wait for it to finish.
    ///
    /// With `aborting` set, pending frames are discarded; otherwise all
    /// frames submitted so far are written out first.
    pub fn stop(self, aborting: bool) -> Result<WriteOutcome> {
        if aborting {
            let _ = self.abort.send(());
        }
        let _ = self.tasks.send(WriterMessage::Flush);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(CallistoError::Process(
                "sequence writer thread panicked".into(),
            )),
        }
    }
}

fn writer_loop<S: SequenceSink>(
    mut sink: S,
    expected: Option<usize>,
    gate: Arc<MemoryGate>,
    output: OutputId,
    tasks: Receiver<WriterMessage>,
    abort: Receiver<()>,
    failed: Arc<AtomicBool>,
) -> Result<WriteOutcome> {
    let mut waiting: BTreeMap<usize, Option<ImageBuffer>> = BTreeMap::new();
    let mut cursor = 0usize;
    let mut written = 0usize;
    let mut remaining = expected;
    let mut format: Option<FrameFormat> = None;
    let mut abort_alive = true;

    let ending = loop {
        if remaining == Some(0) {
            break Ok(Ending::Done);
        }

        // next frame in order already buffered?
        if let Some(slot) = waiting.remove(&cursor) {
            match slot {
                None => {
                    debug!(index = cursor, "hole in sequence, skipping frame");
                    gate.notify_frame_freed(output, cursor);
                }
                Some(image) => {
                    debug!(index = cursor, position = written, "writing frame");
                    let result = sink.write_frame(&image, written);
                    drop(image);
                    gate.notify_frame_freed(output, cursor);
                    if let Err(e) = result {
                        break Err(e);
                    }
                    written += 1;
                }
            }
            cursor += 1;
            if let Some(r) = remaining.as_mut() {
                *r -= 1;
            }
            continue;
        }

        match pop_next(&tasks, &abort, &mut abort_alive) {
            Popped::Abort => {
                debug!("abort received, discarding pending frames");
                break Ok(Ending::Aborted);
            }
            Popped::Flush | Popped::Closed => break Ok(Ending::Flushed),
            Popped::Task(pending) => {
                // an abort racing the task delivery still outranks it
                if abort_alive && abort.try_recv().is_ok() {
                    debug!("abort received, discarding pending frames");
                    if let Some(stale) = waiting.insert(pending.index, pending.image) {
                        drop(stale);
                        gate.notify_frame_freed(output, pending.index);
                    }
                    break Ok(Ending::Aborted);
                }
                if let Some(image) = pending.image.as_ref() {
                    let fmt = image.format();
                    match format {
                        None => {
                            debug!(
                                planes = fmt.planes,
                                height = fmt.height,
                                width = fmt.width,
                                "sequence format locked from first frame"
                            );
                            format = Some(fmt);
                        }
                        Some(locked) => {
                            if let Some(reason) = format_mismatch(&locked, &fmt, sink.geometry()) {
                                gate.notify_frame_freed(output, pending.index);
                                break Err(CallistoError::FormatMismatch {
                                    index: pending.index,
                                    reason,
                                });
                            }
                        }
                    }
                }
                if pending.index < cursor {
                    gate.notify_frame_freed(output, pending.index);
                    break Err(CallistoError::IndexRegression {
                        index: pending.index,
                        cursor,
                    });
                }
                if let Some(stale) = waiting.insert(pending.index, pending.image) {
                    // duplicate index, drop the stale entry
                    drop(stale);
                    gate.notify_frame_freed(output, pending.index);
                }
            }
        }
    };

    let ending = match ending {
        Ok(ending) => ending,
        Err(error) => {
            failed.store(true, Ordering::Release);
            let lost = drain_pending(waiting, &tasks, &gate, output);
            if lost > 0 {
                warn!(lost, "discarding frames after write failure");
            }
            if let Err(e) = sink.finish() {
                debug!(error = %e, "closing output after failure also failed");
            }
            return Err(error);
        }
    };

    let lost = drain_pending(waiting, &tasks, &gate, output);
    // an interrupted run with nothing left pending still counts as
    // complete; with no declared count the written total becomes final
    let complete = match ending {
        Ending::Done => true,
        Ending::Aborted | Ending::Flushed => remaining.map_or(lost == 0, |r| r == 0),
    };

    match ending {
        Ending::Done => {
            debug!(frames_written = written, "sequence write complete");
        }
        Ending::Aborted | Ending::Flushed => {
            if !complete {
                warn!(frames_written = written, lost, "sequence write incomplete");
            } else if expected.is_none() {
                info!(total_frames = written, "sequence complete, frame count now known");
            }
        }
    }

    sink.finish()?;
    Ok(WriteOutcome {
        frames_written: written,
        expected,
        lost,
        complete,
    })
}

/// Pop the next message, giving a pending abort priority over queued tasks.
fn pop_next(
    tasks: &Receiver<WriterMessage>,
    abort: &Receiver<()>,
    abort_alive: &mut bool,
) -> Popped {
    if *abort_alive {
        match abort.try_recv() {
            Ok(()) => return Popped::Abort,
            Err(TryRecvError::Disconnected) => *abort_alive = false,
            Err(TryRecvError::Empty) => {}
        }
    }
    if !*abort_alive {
        return match tasks.recv() {
            Ok(WriterMessage::Task(pending)) => Popped::Task(pending),
            Ok(WriterMessage::Flush) => Popped::Flush,
            Err(_) => Popped::Closed,
        };
    }
    select! {
        recv(abort) -> msg => match msg {
            Ok(()) => Popped::Abort,
            Err(_) => {
                *abort_alive = false;
                match tasks.recv() {
                    Ok(WriterMessage::Task(pending)) => Popped::Task(pending),
                    Ok(WriterMessage::Flush) => Popped::Flush,
                    Err(_) => Popped::Closed,
                }
            }
        },
        recv(tasks) -> msg => match msg {
            Ok(WriterMessage::Task(pending)) => Popped::Task(pending),
            Ok(WriterMessage::Flush) => Popped::Flush,
            Err(_) => Popped::Closed,
        },
    }
}

fn format_mismatch(
    locked: &FrameFormat,
    fmt: &FrameFormat,
    geometry: GeometryPolicy,
) -> Option<String> {
    if fmt.planes != locked.planes {
        return Some(format!(
            "expected {} planes, got {}",
            locked.planes, fmt.planes
        ));
    }
    if fmt.depth != locked.depth {
        return Some(format!(
            "expected {}-bit samples, got {}-bit",
            locked.depth.bits(),
            fmt.depth.bits()
        ));
    }
    if geometry == GeometryPolicy::Fixed && (fmt.width != locked.width || fmt.height != locked.height)
    {
        return Some(format!(
            "expected {}x{} frames, got {}x{}",
            locked.width, locked.height, fmt.width, fmt.height
        ));
    }
    None
}

/// Discard everything still queued or buffered, releasing memory slots.
/// Returns how many real frames were lost.
fn drain_pending(
    waiting: BTreeMap<usize, Option<ImageBuffer>>,
    tasks: &Receiver<WriterMessage>,
    gate: &MemoryGate,
    output: OutputId,
) -> usize {
    let mut lost = 0;
    for (index, image) in waiting {
        if image.is_some() {
            lost += 1;
        }
        drop(image);
        gate.notify_frame_freed(output, index);
    }
    while let Ok(message) = tasks.try_recv() {
        if let WriterMessage::Task(pending) = message {
            if pending.image.is_some() {
                lost += 1;
            }
            gate.notify_frame_freed(output, pending.index);
        }
    }
    lost
}

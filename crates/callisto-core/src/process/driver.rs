use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use crate::error::{CallistoError, Result};
use crate::frame::Rect;
use crate::seqwrite::{MemoryGate, SequenceSink, SequenceWriter};

use super::config::{FrameSelection, ProcessConfig};
use super::hooks::{FrameSource, SequenceOperation};
use super::types::{ProgressReporter, RunOutcome, RunReport};

/// Everything one processing run needs.
pub struct ProcessArgs<'a, S> {
    pub source: &'a dyn FrameSource,
    pub operation: &'a dyn SequenceOperation,
    /// Destination sequence; `None` runs the operation without writing.
    pub sink: Option<S>,
    pub selection: FrameSelection,
    pub config: ProcessConfig,
    /// Area of interest handed through to the operation.
    pub area: Option<Rect>,
    pub reporter: &'a dyn ProgressReporter,
    /// Cooperative cancel flag, checked between frames.
    pub cancel: Arc<AtomicBool>,
    /// Admission gate for in-flight frames. Runs that feed several outputs
    /// from the same frames share one gate.
    pub gate: Arc<MemoryGate>,
}

/// Run an operation over the selected frames of a sequence.
///
/// Frames are claimed by worker threads in ascending order and submitted to
/// the sequence writer as they finish, so output order never depends on
/// which worker wins. A failed frame either fails the run
/// (`stop_on_error`) or leaves a hole that later frames close over.
pub fn run_sequence<S>(args: ProcessArgs<'_, S>) -> Result<RunReport>
where
    S: SequenceSink + Send + 'static,
{
    let ProcessArgs {
        source,
        operation,
        sink,
        selection,
        config,
        area,
        reporter,
        cancel,
        gate,
    } = args;

    let indices = selection.resolve(source.frame_count())?;
    if indices.is_empty() {
        return Err(CallistoError::EmptySequence);
    }

    let threads = operation.memory_limits(source, &config, false);
    if threads == 0 {
        return Err(CallistoError::InsufficientMemory(format!(
            "budget of {} MB cannot fit a single frame",
            config.memory.budget_mb
        )));
    }

    // plan writer admission before prepare so a refused run has
    // nothing to unwind
    let mut slots = 0;
    if sink.is_some() {
        slots = operation.memory_limits(source, &config, true);
        if slots == 0 {
            return Err(CallistoError::InsufficientMemory(format!(
                "budget of {} MB cannot fit a single output frame",
                config.memory.budget_mb
            )));
        }
        // every worker must be able to hold a frame or ordered
        // writing stalls behind the gate
        slots = slots.max(threads);
    }

    info!(
        operation = operation.describe(),
        frames = indices.len(),
        threads,
        "starting sequence operation"
    );

    operation.prepare(source)?;

    let writer = match sink {
        Some(sink) => {
            gate.set_number_of_outputs(1);
            gate.set_max_active_blocks(slots);
            Some(SequenceWriter::start(
                sink,
                Some(indices.len()),
                Arc::clone(&gate),
            ))
        }
        None => None,
    };

    let next = AtomicUsize::new(0);
    let done = AtomicUsize::new(0);
    let frames_failed = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let first_error: Mutex<Option<CallistoError>> = Mutex::new(None);

    let record_error = |error: CallistoError| {
        let mut slot = match first_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(error);
        }
        stop.store(true, Ordering::Release);
    };

    reporter.begin(operation.describe(), indices.len());

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| CallistoError::Process(format!("failed to build thread pool: {e}")))?;

    pool.install(|| {
        rayon::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|_| loop {
                    let rank = next.fetch_add(1, Ordering::Relaxed);
                    if rank >= indices.len() {
                        break;
                    }
                    if cancel.load(Ordering::Relaxed) || stop.load(Ordering::Acquire) {
                        break;
                    }
                    let in_index = indices[rank];

                    if writer.is_some() {
                        gate.wait_for_memory();
                        // may have waited a while, check again before reading
                        if cancel.load(Ordering::Relaxed) || stop.load(Ordering::Acquire) {
                            gate.release_memory();
                            break;
                        }
                    }

                    let produced = source
                        .read_frame(in_index)
                        .and_then(|image| operation.process_frame(rank, in_index, image, area));

                    match produced {
                        Ok(image) => {
                            if let Some(writer) = writer.as_ref() {
                                if let Err(e) = writer.append_write(Some(image), rank) {
                                    gate.release_memory();
                                    record_error(e);
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            frames_failed.fetch_add(1, Ordering::Relaxed);
                            if config.stop_on_error {
                                if writer.is_some() {
                                    gate.release_memory();
                                }
                                record_error(e);
                                break;
                            }
                            warn!(frame = in_index, error = %e, "frame failed, leaving a hole");
                            if let Some(writer) = writer.as_ref() {
                                if let Err(e) = writer.append_write(None, rank) {
                                    gate.release_memory();
                                    record_error(e);
                                    break;
                                }
                            }
                        }
                    }

                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    reporter.advance(finished);
                });
            }
        })
    });

    reporter.finish();

    let cancelled = cancel.load(Ordering::Relaxed);
    let stopped = stop.load(Ordering::Acquire);
    let worker_error = {
        let mut slot = match first_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    };

    let mut frames_written = 0;
    let mut sink_complete = true;
    let mut write_error: Option<CallistoError> = None;

    if let Some(writer) = writer {
        let aborting = cancelled || stopped || writer.has_failed();
        match writer.stop(aborting) {
            Ok(outcome) => {
                frames_written = outcome.frames_written;
                sink_complete = outcome.complete;
            }
            Err(e) => {
                sink_complete = false;
                write_error = Some(e);
            }
        }
    }

    let report = RunReport {
        outcome: if sink_complete && !cancelled && worker_error.is_none() && write_error.is_none()
        {
            RunOutcome::Completed
        } else {
            RunOutcome::Incomplete
        },
        frames_written,
        frames_failed: frames_failed.load(Ordering::Relaxed),
        selected: indices.len(),
    };

    // finalize always runs so operations can clean up after failures
    let finalized = operation.finalize(&report);

    if let Some(e) = write_error {
        return Err(e);
    }
    if let Some(e) = worker_error {
        return Err(e);
    }
    finalized?;

    info!(
        operation = operation.describe(),
        frames_written = report.frames_written,
        frames_failed = report.frames_failed,
        outcome = ?report.outcome,
        "sequence operation finished"
    );

    Ok(report)
}

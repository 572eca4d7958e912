use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::Array3;

use callisto_core::error::{CallistoError, Result};
use callisto_core::frame::{ImageBuffer, SampleDepth};
use callisto_core::seqwrite::{GeometryPolicy, MemoryGate, SequenceSink, SequenceWriter};

/// Mono 2x2 frame whose first pixel carries `tag`, so a test can tell
/// which source frame landed at which output position.
fn tagged_frame(tag: usize) -> ImageBuffer {
    let mut data = Array3::<f32>::zeros((1, 2, 2));
    data[[0, 0, 0]] = tag as f32;
    ImageBuffer::new(data, SampleDepth::Bits16)
}

fn frame_tag(image: &ImageBuffer) -> usize {
    image.data[[0, 0, 0]] as usize
}

type WriteLog = Arc<Mutex<Vec<(usize, usize)>>>;

/// Sink that records (position, tag) pairs instead of writing bytes.
///
/// With a handshake attached, each write first reports its position on
/// `started`, then blocks until the test sends on `release`. That pins the
/// writer thread at a known point so tests can order events around it.
struct RecordingSink {
    writes: WriteLog,
    handshake: Option<(Sender<usize>, Receiver<()>)>,
    policy: GeometryPolicy,
}

impl RecordingSink {
    fn new() -> (Self, WriteLog) {
        Self::with_policy(GeometryPolicy::Fixed)
    }

    fn flexible() -> (Self, WriteLog) {
        Self::with_policy(GeometryPolicy::Flexible)
    }

    fn with_policy(policy: GeometryPolicy) -> (Self, WriteLog) {
        let writes: WriteLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Self {
            writes: Arc::clone(&writes),
            handshake: None,
            policy,
        };
        (sink, writes)
    }

    fn blocking(started: Sender<usize>, release: Receiver<()>) -> (Self, WriteLog) {
        let writes: WriteLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Self {
            writes: Arc::clone(&writes),
            handshake: Some((started, release)),
            policy: GeometryPolicy::Fixed,
        };
        (sink, writes)
    }
}

impl SequenceSink for RecordingSink {
    fn geometry(&self) -> GeometryPolicy {
        self.policy
    }

    fn write_frame(&mut self, image: &ImageBuffer, position: usize) -> Result<()> {
        if let Some((started, release)) = self.handshake.as_ref() {
            started.send(position).unwrap();
            release.recv().unwrap();
        }
        self.writes.lock().unwrap().push((position, frame_tag(image)));
        Ok(())
    }

    fn finish(self) -> Result<()> {
        Ok(())
    }
}

/// Sink whose write always fails.
struct FailingSink;

impl SequenceSink for FailingSink {
    fn geometry(&self) -> GeometryPolicy {
        GeometryPolicy::Fixed
    }

    fn write_frame(&mut self, _image: &ImageBuffer, _position: usize) -> Result<()> {
        Err(CallistoError::Process("synthetic write failure".into()))
    }

    fn finish(self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn frames_are_written_in_index_order() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, Some(5), Arc::clone(&gate));

    for index in [3, 1, 4, 0, 2] {
        writer.append_write(Some(tagged_frame(index)), index).unwrap();
    }
    let outcome = writer.stop(false).unwrap();

    assert_eq!(outcome.frames_written, 5);
    assert!(outcome.complete);
    assert_eq!(outcome.lost, 0);
    let writes = writes.lock().unwrap();
    assert_eq!(*writes, vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 4)]);
}

#[test]
fn holes_are_compacted_out_of_the_output() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, Some(5), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(2)), 2).unwrap();
    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    writer.append_write(Some(tagged_frame(4)), 4).unwrap();
    writer.append_write(None, 3).unwrap();
    writer.append_write(Some(tagged_frame(1)), 1).unwrap();
    let outcome = writer.stop(false).unwrap();

    assert_eq!(outcome.frames_written, 4);
    assert!(outcome.complete);
    // frame 4 closes over the hole at index 3 and lands at position 3
    let writes = writes.lock().unwrap();
    assert_eq!(*writes, vec![(0, 0), (1, 1), (2, 2), (3, 4)]);
}

#[test]
fn unknown_count_reports_written_total_as_success() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, None, Arc::clone(&gate));

    for index in 0..3 {
        writer.append_write(Some(tagged_frame(index)), index).unwrap();
    }
    let outcome = writer.stop(false).unwrap();

    assert_eq!(outcome.frames_written, 3);
    assert_eq!(outcome.expected, None);
    assert!(outcome.complete);
    assert_eq!(writes.lock().unwrap().len(), 3);
}

#[test]
fn unknown_count_with_gap_is_incomplete() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, None, Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    writer.append_write(Some(tagged_frame(2)), 2).unwrap();
    let outcome = writer.stop(false).unwrap();

    assert_eq!(outcome.frames_written, 1);
    assert_eq!(outcome.lost, 1);
    assert!(!outcome.complete);
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0)]);
}

#[test]
fn format_mismatch_fails_the_write() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, Some(3), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    let mismatched = ImageBuffer::new(Array3::<f32>::zeros((1, 3, 3)), SampleDepth::Bits16);
    writer.append_write(Some(mismatched), 1).unwrap();

    let err = writer.stop(false).unwrap_err();
    assert!(matches!(
        err,
        CallistoError::FormatMismatch { index: 1, .. }
    ));
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0)]);
}

#[test]
fn plane_count_change_fails_under_flexible_geometry() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::flexible();
    let writer = SequenceWriter::start(sink, Some(2), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    let color = ImageBuffer::new(Array3::<f32>::zeros((3, 2, 2)), SampleDepth::Bits16);
    writer.append_write(Some(color), 1).unwrap();

    let err = writer.stop(false).unwrap_err();
    assert!(matches!(
        err,
        CallistoError::FormatMismatch { index: 1, .. }
    ));
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0)]);
}

#[test]
fn sample_depth_change_fails_the_write() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, Some(2), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    let mismatched = ImageBuffer::new(Array3::<f32>::zeros((1, 2, 2)), SampleDepth::Bits8);
    writer.append_write(Some(mismatched), 1).unwrap();

    let err = writer.stop(false).unwrap_err();
    assert!(matches!(
        err,
        CallistoError::FormatMismatch { index: 1, .. }
    ));
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0)]);
}

#[test]
fn flexible_sink_accepts_varying_dimensions() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::flexible();
    let writer = SequenceWriter::start(sink, Some(2), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    let mut larger = Array3::<f32>::zeros((1, 4, 4));
    larger[[0, 0, 0]] = 1.0;
    let frame = ImageBuffer::new(larger, SampleDepth::Bits16);
    writer.append_write(Some(frame), 1).unwrap();

    let outcome = writer.stop(false).unwrap();
    assert_eq!(outcome.frames_written, 2);
    assert!(outcome.complete);
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0), (1, 1)]);
}

#[test]
fn append_fails_fast_after_writer_error() {
    let gate = Arc::new(MemoryGate::new());
    let writer = SequenceWriter::start(FailingSink, Some(10), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();

    // the failure flag is raised from the writer thread
    let mut waited = Duration::ZERO;
    while !writer.has_failed() && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(1));
        waited += Duration::from_millis(1);
    }
    assert!(writer.has_failed());

    let err = writer.append_write(Some(tagged_frame(1)), 1).unwrap_err();
    assert!(matches!(err, CallistoError::WriterUnavailable));

    let err = writer.stop(false).unwrap_err();
    assert!(matches!(err, CallistoError::Process(_)));
}

#[test]
fn index_regression_is_fatal() {
    let gate = Arc::new(MemoryGate::new());
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let (sink, _writes) = RecordingSink::blocking(started_tx, release_rx);
    let writer = SequenceWriter::start(sink, Some(5), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(0));
    release_tx.send(()).unwrap();

    // the cursor has moved past 0, a second frame 0 must be rejected
    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    let err = writer.stop(false).unwrap_err();
    assert!(matches!(
        err,
        CallistoError::IndexRegression { index: 0, cursor: 1 }
    ));
}

#[test]
fn abort_discards_pending_frames() {
    let gate = Arc::new(MemoryGate::new());
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let (sink, writes) = RecordingSink::blocking(started_tx, release_rx);
    let writer = SequenceWriter::start(sink, Some(3), Arc::clone(&gate));

    for index in 0..3 {
        writer.append_write(Some(tagged_frame(index)), index).unwrap();
    }

    // frame 0 is mid-write; abort before letting it complete
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(0));
    writer.abort();
    release_tx.send(()).unwrap();

    // the abort signal outranks frames 1 and 2 still in the queue
    assert!(started_rx.recv_timeout(Duration::from_millis(200)).is_err());

    let outcome = writer.stop(true).unwrap();
    assert_eq!(outcome.frames_written, 1);
    assert_eq!(outcome.lost, 2);
    assert!(!outcome.complete);
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0)]);
}

#[test]
fn abort_after_all_frames_written_fixes_unknown_count() {
    let gate = Arc::new(MemoryGate::new());
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let (sink, writes) = RecordingSink::blocking(started_tx, release_rx);
    let writer = SequenceWriter::start(sink, None, Arc::clone(&gate));

    // drive both frames through the sink before signalling the abort
    for index in 0..2 {
        writer.append_write(Some(tagged_frame(index)), index).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(index));
        release_tx.send(()).unwrap();
    }

    let outcome = writer.stop(true).unwrap();
    assert_eq!(outcome.frames_written, 2);
    assert_eq!(outcome.expected, None);
    assert_eq!(outcome.lost, 0);
    assert!(outcome.complete);
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0), (1, 1)]);
}

#[test]
fn abort_short_of_known_count_stays_incomplete() {
    let gate = Arc::new(MemoryGate::new());
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let (sink, _writes) = RecordingSink::blocking(started_tx, release_rx);
    let writer = SequenceWriter::start(sink, Some(3), Arc::clone(&gate));

    for index in 0..2 {
        writer.append_write(Some(tagged_frame(index)), index).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(index));
        release_tx.send(()).unwrap();
    }

    let outcome = writer.stop(true).unwrap();
    assert_eq!(outcome.frames_written, 2);
    assert_eq!(outcome.lost, 0);
    assert!(!outcome.complete);
}

#[test]
fn frame_sent_after_abort_is_never_written() {
    let gate = Arc::new(MemoryGate::new());
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let (sink, writes) = RecordingSink::blocking(started_tx, release_rx);
    let writer = SequenceWriter::start(sink, Some(2), Arc::clone(&gate));

    writer.append_write(Some(tagged_frame(0)), 0).unwrap();
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(0));
    writer.abort();
    // frame 1 would be next at the cursor, but the abort came first
    writer.append_write(Some(tagged_frame(1)), 1).unwrap();
    release_tx.send(()).unwrap();

    let outcome = writer.stop(true).unwrap();
    assert_eq!(outcome.frames_written, 1);
    assert_eq!(outcome.lost, 1);
    assert!(!outcome.complete);
    assert_eq!(*writes.lock().unwrap(), vec![(0, 0)]);
}

#[test]
fn flush_writes_pending_frames_before_stopping() {
    let gate = Arc::new(MemoryGate::new());
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, Some(3), Arc::clone(&gate));

    for index in 0..3 {
        writer.append_write(Some(tagged_frame(index)), index).unwrap();
    }
    let outcome = writer.stop(false).unwrap();

    assert_eq!(outcome.frames_written, 3);
    assert!(outcome.complete);
    assert_eq!(writes.lock().unwrap().len(), 3);
}

#[test]
fn holes_release_memory_slots() {
    let gate = Arc::new(MemoryGate::new());
    gate.set_max_active_blocks(2);
    let (sink, writes) = RecordingSink::new();
    let writer = SequenceWriter::start(sink, Some(2), Arc::clone(&gate));

    gate.wait_for_memory();
    gate.wait_for_memory();
    assert_eq!(gate.active_blocks(), 2);

    writer.append_write(None, 0).unwrap();
    writer.append_write(None, 1).unwrap();
    let outcome = writer.stop(false).unwrap();

    assert_eq!(outcome.frames_written, 0);
    assert!(outcome.complete);
    assert_eq!(gate.active_blocks(), 0);
    assert!(writes.lock().unwrap().is_empty());
}

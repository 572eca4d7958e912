use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::{debug, warn};

/// Identity of one sequence output registered with a [`MemoryGate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputId(u64);

#[derive(Clone, Copy, Default, Debug)]
struct OutputSlot {
    id: Option<OutputId>,
    highest: Option<usize>,
}

#[derive(Default)]
struct GateState {
    active: usize,
    ceiling: usize,
    outputs: Vec<OutputSlot>,
}

/// Counting gate that bounds how many frames are in flight at once.
///
/// Workers call [`wait_for_memory`](Self::wait_for_memory) before reading a
/// frame and the sequence writer calls
/// [`notify_frame_freed`](Self::notify_frame_freed) once the frame has been
/// written out, so the reorder buffer plus all frames being processed never
/// exceed the configured ceiling. A ceiling of zero disables the gate.
///
/// When one processing run feeds several outputs, a block is only released
/// once every registered output has written the frame, so the slowest output
/// bounds the whole run.
pub struct MemoryGate {
    state: Mutex<GateState>,
    freed: Condvar,
    next_output: AtomicU64,
}

impl Default for MemoryGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGate {
    /// New gate with no ceiling and no outputs registered.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            freed: Condvar::new(),
            next_output: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn release_locked(&self, state: &mut GateState) {
        if state.ceiling == 0 {
            return;
        }
        state.active = state.active.saturating_sub(1);
        self.freed.notify_one();
    }

    /// Block until a frame slot is available, then claim it.
    ///
    /// Admits immediately when the ceiling is zero; no slot is counted in
    /// that case, so [`release_memory`](Self::release_memory) stays balanced.
    /// The ceiling is re-read on every wakeup, so waiters also get through
    /// when it is raised or reset to unlimited while they sleep.
    pub fn wait_for_memory(&self) {
        let mut state = self.lock_state();
        while state.ceiling != 0 && state.active >= state.ceiling {
            state = match self.freed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if state.ceiling != 0 {
            state.active += 1;
        }
    }

    /// Give back a slot claimed with `wait_for_memory` without going through
    /// the writer, for frames that error out before being submitted.
    pub fn release_memory(&self) {
        let mut state = self.lock_state();
        self.release_locked(&mut state);
    }

    /// Change the ceiling. Zero means unlimited and wakes every waiter;
    /// raising the ceiling by `d` wakes exactly `d` waiters.
    pub fn set_max_active_blocks(&self, max: usize) {
        let mut state = self.lock_state();
        debug!(max, "frames allowed in flight for sequence output");
        if max == 0 {
            state.ceiling = 0;
            self.freed.notify_all();
            return;
        }
        let raised_by = max.saturating_sub(state.ceiling);
        state.ceiling = max;
        for _ in 0..raised_by {
            self.freed.notify_one();
        }
    }

    /// Declare how many outputs will consume each frame. Resets any
    /// previously registered outputs.
    pub fn set_number_of_outputs(&self, count: usize) {
        let mut state = self.lock_state();
        state.outputs = vec![OutputSlot::default(); count];
    }

    /// Hand out a fresh identity for one sequence output.
    pub fn allocate_output_id(&self) -> OutputId {
        OutputId(self.next_output.fetch_add(1, Ordering::Relaxed))
    }

    /// Record that output `id` is done with frame `index` and release one
    /// slot once every registered output has written that frame.
    pub fn notify_frame_freed(&self, id: OutputId, index: usize) {
        let mut state = self.lock_state();
        if state.outputs.len() <= 1 {
            self.release_locked(&mut state);
            return;
        }

        let mut slot_idx = state.outputs.iter().position(|s| s.id == Some(id));
        if slot_idx.is_none() {
            // first notification from this output claims a free slot
            if let Some(free) = state.outputs.iter().position(|s| s.id.is_none()) {
                state.outputs[free].id = Some(id);
                slot_idx = Some(free);
            }
        }
        let Some(slot_idx) = slot_idx else {
            warn!("more sequence outputs than declared, releasing directly");
            self.release_locked(&mut state);
            return;
        };

        let expected = state.outputs[slot_idx].highest.map_or(0, |h| h + 1);
        if index != expected {
            warn!(index, expected, "sequence output freed frames out of order");
        }
        if state.outputs[slot_idx].highest.map_or(true, |h| index > h) {
            state.outputs[slot_idx].highest = Some(index);
        }

        let all_done = state
            .outputs
            .iter()
            .all(|s| s.highest.map_or(false, |h| h >= index));
        if all_done {
            self.release_locked(&mut state);
        }
    }

    /// Number of slots currently claimed.
    pub fn active_blocks(&self) -> usize {
        self.lock_state().active
    }
}

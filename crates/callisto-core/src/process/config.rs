use serde::{Deserialize, Serialize};

use crate::consts::{BYTES_PER_MB, DEFAULT_MEMORY_BUDGET_MB};
use crate::error::{CallistoError, Result};

/// Configuration for sequence processing runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Worker threads to use, 0 means one per core.
    pub max_threads: usize,
    pub memory: MemoryBudget,
    /// Fail the whole run on the first frame error instead of skipping
    /// the frame.
    pub stop_on_error: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            memory: MemoryBudget::default(),
            stop_on_error: false,
        }
    }
}

impl ProcessConfig {
    pub fn effective_threads(&self) -> usize {
        if self.max_threads > 0 {
            self.max_threads
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }
}

/// Memory available for in-flight frame data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBudget {
    pub budget_mb: usize,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            budget_mb: DEFAULT_MEMORY_BUDGET_MB,
        }
    }
}

impl MemoryBudget {
    pub fn budget_bytes(&self) -> usize {
        self.budget_mb * BYTES_PER_MB
    }
}

/// Which frames of a sequence to process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSelection {
    #[default]
    All,
    /// Inclusive range with a stride.
    Range { from: usize, to: usize, step: usize },
    Indices(Vec<usize>),
}

impl FrameSelection {
    /// Expand to concrete source frame indices, in output order.
    pub fn resolve(&self, total: usize) -> Result<Vec<usize>> {
        match self {
            FrameSelection::All => Ok((0..total).collect()),
            FrameSelection::Range { from, to, step } => {
                if *to >= total {
                    return Err(CallistoError::FrameIndexOutOfRange { index: *to, total });
                }
                let step = (*step).max(1);
                Ok((*from..=*to).step_by(step).collect())
            }
            FrameSelection::Indices(indices) => {
                for &index in indices {
                    if index >= total {
                        return Err(CallistoError::FrameIndexOutOfRange { index, total });
                    }
                }
                Ok(indices.clone())
            }
        }
    }
}

/// In-flight frames the write queue may hold per worker thread. Producers
/// that run ahead of the writer block once the admission ceiling
/// (worker count times this factor, capped by the memory budget) is reached.
pub const WRITER_QUEUE_FACTOR: usize = 3;

/// Default memory budget for a sequence run when none is configured (MiB).
pub const DEFAULT_MEMORY_BUDGET_MB: usize = 4096;

/// Bytes per MiB.
pub const BYTES_PER_MB: usize = 1 << 20;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallistoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SER file: {0}")]
    InvalidSer(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Frame index {index} out of range (total: {total})")]
    FrameIndexOutOfRange { index: usize, total: usize },

    #[error("Invalid crop region: {0}")]
    InvalidCrop(String),

    #[error("Frame {index} does not match the sequence format: {reason}")]
    FormatMismatch { index: usize, reason: String },

    #[error("Frame {index} arrived behind the write cursor (next expected: {cursor})")]
    IndexRegression { index: usize, cursor: usize },

    #[error("Sequence writer is not accepting frames")]
    WriterUnavailable,

    #[error("Not enough memory to process the sequence: {0}")]
    InsufficientMemory(String),

    #[error("Sequence processing error: {0}")]
    Process(String),

    #[error("Empty frame sequence")]
    EmptySequence,
}

pub type Result<T> = std::result::Result<T, CallistoError>;

/// Errors that can occur while decoding side-channel frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The structured header could not be parsed. The frame was consumed.
    #[error("invalid event header: {0}")]
    InvalidHeader(String),

    /// The payload is too short to carry the {type, length} trailer.
    #[error("event payload too short for trailer ({len} bytes, need {min})")]
    MissingTrailer { len: usize, min: usize },

    /// The declared frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors that can occur while encoding commands or decoding responses.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A text response ended before its tag character.
    #[error("response with code {code:#04x} has no tag")]
    MissingTag { code: u8 },

    /// A text line grew past the configured maximum without a newline.
    #[error("text line too long ({len} bytes, max {max})")]
    LineTooLong { len: usize, max: usize },

    /// The payload exceeds what the encoding can carry.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A command type letter is not an ASCII letter.
    #[error("invalid command type code {0:#04x}")]
    InvalidTypeCode(u8),

    /// A text payload would terminate its own line.
    #[error("text payload contains a newline")]
    PayloadContainsNewline,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

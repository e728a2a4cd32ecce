use cmdlink_frame::Tag;

/// Errors returned synchronously by dispatcher and client operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error (open/connect failure, fatal stream fault).
    #[error("transport error: {0}")]
    Transport(#[from] cmdlink_transport::TransportError),

    /// Malformed or truncated frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] cmdlink_frame::FrameError),

    /// A response arrived that no pending request was waiting for.
    #[error("response {code:#04x}/{tag} matches no pending request")]
    UnmatchedResponse { code: u8, tag: Tag },

    /// Every tag is in use; the submission was rejected.
    #[error("too many requests in flight (max {capacity})")]
    QueueFull { capacity: usize },

    /// A raw submission asked for a tag that is still live.
    #[error("tag {tag} is already in flight")]
    TagBusy { tag: Tag },

    /// The dispatcher is no longer running.
    #[error("dispatcher stopped")]
    Stopped,

    /// The device did not answer within the read timeout.
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// The request itself failed.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Terminal failure of one request, stored on its [`Handle`](crate::Handle).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The device never answered, even after every resend.
    #[error("no response after {retries} retries")]
    RetryExhausted { retries: u32 },

    /// The response arrived but the parse function rejected it.
    #[error("response could not be parsed: {0}")]
    Parse(String),

    /// Writing this request to the device failed.
    #[error("command write failed: {0}")]
    Transport(String),

    /// The pending table had no room when the command was sent.
    #[error("pending table full (max {capacity})")]
    QueueFull { capacity: usize },

    /// The dispatcher shut down on a fatal stream fault.
    #[error("dispatcher disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;

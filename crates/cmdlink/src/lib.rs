//! Request/response transport for half-duplex serial command devices.
//!
//! A device on the other end of the stream executes one command at a time,
//! in order, and answers each with a response tagged like the command. This
//! crate multiplexes many callers onto that stream, pairs answers with their
//! requests, and resends what the device lost.
//!
//! # Crate Structure
//!
//! - [`transport`]: Device streams (serial ttys, Unix socket simulators) and readiness waits
//! - [`frame`]: Command encoding, response decoding, tags
//! - [`dispatch`]: Threaded dispatcher and synchronous client (behind `dispatch` feature)
//! - [`logging`]: `tracing` subscriber setup for tools and simulators (behind `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use cmdlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cmdlink_frame::*;
}

/// Re-export dispatcher types (requires `dispatch` feature).
#[cfg(feature = "dispatch")]
pub mod dispatch {
    pub use cmdlink_dispatch::*;
}

#[cfg(feature = "logging")]
pub mod logging;

//! Byte-stream transports for half-duplex command devices.
//!
//! Provides a unified stream type over the ways a host reaches a device:
//! - Serial ttys opened in raw mode
//! - Unix domain sockets to a device simulator
//! - In-process loopback pairs for tests
//!
//! This is the lowest layer of cmdlink. The readiness wait in [`poll`] is what
//! lets the dispatcher block on the device and its wakeup channel at once.

pub mod error;
#[cfg(unix)]
pub mod loopback;
#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod traits;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use loopback::loopback_pair;
#[cfg(unix)]
pub use poll::wait_readable;
#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort};
#[cfg(unix)]
pub use traits::{DeviceStream, Transport};
#[cfg(unix)]
pub use uds::DeviceListener;

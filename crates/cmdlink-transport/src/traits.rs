use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::Result;
use crate::poll::wait_readable;

/// Anything the dispatcher can drive: a byte stream that also exposes a
/// descriptor for the readiness wait.
pub trait Transport: Read + Write + AsFd + Send {}

impl<T: Read + Write + AsFd + Send> Transport for T {}

/// A connected device stream: a serial tty or a Unix socket to a simulator.
///
/// An optional read timeout turns a silent device into
/// `ErrorKind::TimedOut` instead of an indefinite block.
pub struct DeviceStream {
    inner: DeviceStreamInner,
    read_timeout: Option<Duration>,
}

enum DeviceStreamInner {
    Serial(File),
    Unix(UnixStream),
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(timeout) = self.read_timeout {
            let ready = wait_readable(&[self.as_fd()], Some(timeout))?;
            if !ready.first().copied().unwrap_or(false) {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "device read timed out",
                ));
            }
        }
        match &mut self.inner {
            DeviceStreamInner::Serial(file) => file.read(buf),
            DeviceStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Serial(file) => file.write(buf),
            DeviceStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            DeviceStreamInner::Serial(file) => file.flush(),
            DeviceStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl AsFd for DeviceStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.inner {
            DeviceStreamInner::Serial(file) => file.as_fd(),
            DeviceStreamInner::Unix(stream) => stream.as_fd(),
        }
    }
}

impl DeviceStream {
    pub(crate) fn from_serial(file: File) -> Self {
        Self {
            inner: DeviceStreamInner::Serial(file),
            read_timeout: None,
        }
    }

    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: DeviceStreamInner::Unix(stream),
            read_timeout: None,
        }
    }

    /// Set the read timeout applied to every subsequent `read`.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Current read timeout.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// The clone starts without a read timeout.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            DeviceStreamInner::Serial(file) => Ok(Self::from_serial(file.try_clone()?)),
            DeviceStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            DeviceStreamInner::Serial(_) => "serial",
            DeviceStreamInner::Unix(_) => "unix-domain-socket",
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("type", &self.transport_name())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

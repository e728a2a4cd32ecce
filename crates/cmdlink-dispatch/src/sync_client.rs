//! Blocking client without a background thread.

use std::fmt;
use std::io::{ErrorKind, Write};

use bytes::Bytes;
use cmdlink_frame::{
    write_command, Command, EncodedCommand, FrameError, FrameReader, ResponseKey, TagPool,
};
use cmdlink_transport::{DeviceStream, Transport, TransportError};
use tracing::{debug, trace, warn};

use crate::config::SyncConfig;
use crate::error::{LinkError, RequestError, Result};

/// One command at a time, answered in the calling thread.
///
/// Writes the command and reads frames until one carries the expected key.
/// Frames for other keys are discarded. There is no retry: a read timeout
/// on the stream ends the call with [`LinkError::Timeout`].
pub struct SyncClient<T> {
    reader: FrameReader<T>,
    tags: TagPool,
    config: SyncConfig,
}

impl SyncClient<DeviceStream> {
    /// Apply the configured read timeout to `stream`, then connect.
    pub fn open(mut stream: DeviceStream, config: SyncConfig) -> Result<Self> {
        stream.set_read_timeout(Some(config.read_timeout));
        Self::new(stream, config)
    }
}

impl<T: Transport> SyncClient<T> {
    /// Wrap a transport whose reads already time out.
    ///
    /// Writes the wake sequence and drops the banner line, if configured.
    /// A banner that never arrives is not an error.
    pub fn new(mut transport: T, config: SyncConfig) -> Result<Self> {
        if let Some(wake) = &config.wake_sequence {
            transport.write_all(wake).map_err(TransportError::Io)?;
            transport.flush().map_err(TransportError::Io)?;
        }

        let mut reader = FrameReader::with_max_line_len(transport, config.max_line_len);
        if config.wake_sequence.is_some() && config.skip_banner {
            match reader.skip_line() {
                Ok(()) => trace!("banner skipped"),
                Err(FrameError::Io(err)) if is_timeout(&err) => debug!("no banner"),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Self {
            reader,
            tags: TagPool::new(1),
            config,
        })
    }

    /// Send `command` and parse the matching response payload.
    pub fn send<V, F, E>(&mut self, command: &Command, parse: F) -> Result<V>
    where
        F: FnOnce(Bytes) -> std::result::Result<V, E>,
        E: fmt::Display,
    {
        let tag = self.tags.acquire().ok_or(LinkError::QueueFull { capacity: 1 })?;
        let outcome = command
            .with_tag(tag)
            .map_err(LinkError::from)
            .and_then(|encoded| self.exchange(&encoded));
        self.tags.release(tag);

        let payload = outcome?;
        parse(payload).map_err(|err| RequestError::Parse(err.to_string()).into())
    }

    /// Send `command` and return the raw payload.
    pub fn request(&mut self, command: &Command) -> Result<Bytes> {
        self.send(command, Ok::<Bytes, std::convert::Infallible>)
    }

    /// Send pre-encoded bytes and wait for the response keyed `key`.
    pub fn send_raw(&mut self, bytes: &[u8], key: ResponseKey) -> Result<Bytes> {
        let encoded = EncodedCommand {
            bytes: Bytes::copy_from_slice(bytes),
            key,
        };
        self.exchange(&encoded)
    }

    fn exchange(&mut self, encoded: &EncodedCommand) -> Result<Bytes> {
        let key = encoded.key;
        let stale = self.reader.discard_buffered();
        if stale > 0 {
            debug!(bytes = stale, "discarding input left by an earlier command");
        }
        write_command(self.reader.get_mut(), &encoded.bytes)?;
        debug!(code = key.code, tag = %key.tag, "command written");

        loop {
            match self.reader.read_frame() {
                Ok(frame) if frame.key == key => {
                    trace!(size = frame.payload.len(), "response matched");
                    return Ok(frame.payload);
                }
                Ok(frame) if frame.is_unknown_command() => {
                    debug!(tag = %frame.key.tag, "device did not recognize a command");
                }
                Ok(frame) => {
                    warn!(
                        code = frame.key.code,
                        tag = %frame.key.tag,
                        "discarding unexpected response"
                    );
                }
                Err(FrameError::Io(err)) if is_timeout(&err) => {
                    return Err(LinkError::Timeout(self.config.read_timeout));
                }
                Err(err @ (FrameError::Io(_) | FrameError::ConnectionClosed)) => {
                    return Err(err.into());
                }
                Err(err) => warn!(%err, "discarding malformed response"),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        self.reader.get_ref()
    }

    /// Release the transport. Unread buffered input is dropped.
    pub fn into_inner(self) -> T {
        self.reader.into_inner()
    }
}

impl<T> fmt::Debug for SyncClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("read_timeout", &self.config.read_timeout)
            .finish_non_exhaustive()
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

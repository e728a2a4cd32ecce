//! Device side of the protocol, for simulators and tests.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{encode_response, is_binary_code, ResponseFrame, ResponseKey};
use crate::error::{FrameError, Result};
use crate::tag::Tag;
use crate::writer::write_command;

const READ_CHUNK_SIZE: usize = 1024;

/// A command as received by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    /// First byte on the wire (uppercase letter or complemented binary code).
    pub code: u8,
    pub tag: Tag,
    /// Text: the comma-separated arguments. Binary: the trailer without its
    /// terminating zero.
    pub args: Bytes,
    /// Exact bytes received, terminator included.
    pub raw: Bytes,
}

impl DeviceCommand {
    /// Key the host is waiting for.
    pub fn response_key(&self) -> ResponseKey {
        if is_binary_code(self.code) {
            ResponseKey::new(self.code, self.tag)
        } else {
            ResponseKey::new(self.code.to_ascii_lowercase(), self.tag)
        }
    }

    /// Text arguments parsed as integers.
    pub fn int_args(&self) -> Vec<i64> {
        std::str::from_utf8(&self.args)
            .unwrap_or_default()
            .split(',')
            .filter_map(|field| field.trim().parse().ok())
            .collect()
    }
}

/// Plays the device on the far end of a stream.
///
/// Reads commands the host wrote and answers with text or binary responses.
/// Binary commands are read up to their zero terminator.
pub struct DeviceEnd<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Read + Write> DeviceEnd<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }

    /// Read the next command (blocking). Wake bytes (`\r`, `\n`) are skipped.
    pub fn read_command(&mut self) -> Result<DeviceCommand> {
        loop {
            if let Some(command) = self.take_command() {
                return Ok(command);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    fn take_command(&mut self) -> Option<DeviceCommand> {
        let skip = self
            .buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        self.buf.advance(skip);

        if self.buf.len() < 2 {
            return None;
        }
        let code = self.buf[0];
        let tag = Tag::from_byte(self.buf[1]);
        let terminator = if is_binary_code(code) { 0 } else { b'\n' };
        let end = self.buf[2..].iter().position(|&b| b == terminator)? + 2;

        let raw = self.buf.split_to(end + 1).freeze();
        let mut args = raw.slice(2..end);
        if args.first() == Some(&b',') {
            args.advance(1);
        }
        Some(DeviceCommand {
            code,
            tag,
            args,
            raw,
        })
    }

    /// Send a response frame.
    pub fn reply(&mut self, frame: &ResponseFrame) -> Result<()> {
        let mut wire = BytesMut::new();
        encode_response(frame, &mut wire)?;
        self.send_raw(&wire)
    }

    /// Answer `command` with a text response carrying `payload`.
    pub fn reply_text(&mut self, command: &DeviceCommand, payload: &[u8]) -> Result<()> {
        let key = command.response_key();
        self.reply(&ResponseFrame::text(
            key.code,
            key.tag,
            Bytes::copy_from_slice(payload),
        ))
    }

    /// Answer `command` with a binary response carrying `payload`.
    pub fn reply_binary(&mut self, command: &DeviceCommand, payload: &[u8]) -> Result<()> {
        let key = command.response_key();
        self.reply(&ResponseFrame::binary(
            key.code,
            key.tag,
            Bytes::copy_from_slice(payload),
        ))
    }

    /// Write arbitrary bytes, e.g. malformed or unsolicited frames.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        write_command(&mut self.inner, bytes)
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

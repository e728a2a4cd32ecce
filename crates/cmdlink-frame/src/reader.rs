use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};

use crate::codec::{decode_frame, ResponseFrame, DEFAULT_MAX_LINE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Reads complete responses from any `Read` stream.
///
/// Handles partial reads internally. [`read_frame`](Self::read_frame) blocks
/// until a whole frame is available; [`fill`](Self::fill) and
/// [`next_buffered`](Self::next_buffered) let a readiness-driven caller read
/// once and then drain every frame that arrived.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    max_line_len: usize,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with the default line limit.
    pub fn new(inner: T) -> Self {
        Self::with_max_line_len(inner, DEFAULT_MAX_LINE)
    }

    /// Create a new frame reader with an explicit text line limit.
    pub fn with_max_line_len(inner: T, max_line_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_line_len,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// A read timeout on the underlying stream surfaces as `FrameError::Io`
    /// with `TimedOut` or `WouldBlock`. EOF yields `ConnectionClosed`.
    pub fn read_frame(&mut self) -> Result<ResponseFrame> {
        loop {
            if let Some(frame) = self.next_buffered()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Decode the next frame already sitting in the buffer, if any.
    pub fn next_buffered(&mut self) -> Result<Option<ResponseFrame>> {
        decode_frame(&mut self.buf, self.max_line_len)
    }

    /// Perform one read from the stream into the buffer.
    ///
    /// Returns the number of bytes read; EOF yields `ConnectionClosed`.
    pub fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Discard input up to and including the next `\n`, reading as needed.
    ///
    /// Used to drop free-form lines such as a device banner that are not
    /// frames.
    pub fn skip_line(&mut self) -> Result<()> {
        loop {
            if let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
                self.buf.advance(newline + 1);
                return Ok(());
            }
            self.buf.clear();
            self.fill()?;
        }
    }

    /// Drop every buffered byte not yet decoded and return how many there were.
    pub fn discard_buffered(&mut self) -> usize {
        let len = self.buf.len();
        self.buf.clear();
        len
    }

    /// Number of buffered bytes not yet decoded.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::codec::{encode_response, Encoding};
    use crate::tag::Tag;

    #[test]
    fn read_text_then_binary() {
        let mut wire = BytesMut::new();
        wire.put_slice(b"ea,12,-4\n");
        encode_response(
            &ResponseFrame::binary(0xB7, Tag::from_byte(b'b'), &b"\x01\x02"[..]),
            &mut wire,
        )
        .unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let first = reader.read_frame().unwrap();
        let second = reader.read_frame().unwrap();

        assert_eq!(first.encoding, Encoding::Text);
        assert_eq!(first.payload.as_ref(), b"12,-4");
        assert_eq!(second.encoding, Encoding::Binary);
        assert_eq!(second.payload.as_ref(), b"\x01\x02");
    }

    #[test]
    fn partial_read_handling() {
        let reader = ByteByByteReader {
            bytes: b"na,1,2,3,4,5,6,7,8\n".to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(reader);
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.key.code, b'n');
        assert_eq!(frame.payload.as_ref(), b"1,2,3,4,5,6,7,8");
    }

    #[test]
    fn truncated_binary_is_connection_closed() {
        let mut reader = FrameReader::new(Cursor::new(vec![0xB7, b'a', 0x10, 0x00, 1, 2]));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn fill_then_drain_buffered_frames() {
        let mut reader = FrameReader::new(Cursor::new(b"ba\ncb,3\nd".to_vec()));
        assert_eq!(reader.fill().unwrap(), 9);

        assert_eq!(reader.next_buffered().unwrap().unwrap().key.code, b'b');
        assert_eq!(reader.next_buffered().unwrap().unwrap().key.code, b'c');
        assert!(reader.next_buffered().unwrap().is_none());
        assert_eq!(reader.buffered_len(), 1);
    }

    #[test]
    fn line_limit_applies() {
        let mut reader = FrameReader::with_max_line_len(Cursor::new(b"ea,0123456789".to_vec()), 4);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { .. }));
    }

    #[test]
    fn skip_line_drops_banner() {
        let reader = ByteByByteReader {
            bytes: b"Device v1.2 ready\r\nea,7\n".to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(reader);
        reader.skip_line().unwrap();
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.key.code, b'e');
        assert_eq!(frame.payload.as_ref(), b"7");
    }

    #[test]
    fn skip_line_at_eof_is_connection_closed() {
        let mut reader = FrameReader::new(Cursor::new(b"no newline".to_vec()));
        assert!(matches!(
            reader.skip_line(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn discard_buffered_drops_partial_frame() {
        let mut reader = FrameReader::new(Cursor::new(b"\xB7a\x05".to_vec()));
        reader.fill().unwrap();
        assert!(reader.next_buffered().unwrap().is_none());

        assert_eq!(reader.discard_buffered(), 3);
        assert_eq!(reader.buffered_len(), 0);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }
}

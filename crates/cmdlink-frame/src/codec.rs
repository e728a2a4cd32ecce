use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::tag::Tag;

/// Leading bytes at or above this value start a binary response.
pub const BINARY_CODE_MIN: u8 = 0x7F;

/// Binary header: code (1) + tag (1) + length (2).
pub const BINARY_HEADER_SIZE: usize = 4;

/// Response code the device sends for a command it does not recognize.
pub const UNKNOWN_COMMAND: u8 = b'z';

/// Default maximum length of a text response line: 64 KiB.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Whether a leading byte selects the binary encoding.
pub fn is_binary_code(code: u8) -> bool {
    code >= BINARY_CODE_MIN
}

/// Correlation key shared by a request and the response it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    /// Response type code (lowercase letter or binary code byte).
    pub code: u8,
    /// Tag echoed by the device.
    pub tag: Tag,
}

impl ResponseKey {
    pub fn new(code: u8, tag: Tag) -> Self {
        Self { code, tag }
    }
}

/// Wire encoding of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Binary,
}

/// One decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub key: ResponseKey,
    pub encoding: Encoding,
    /// Text: the fields after the tag, without the line terminator.
    /// Binary: the raw payload.
    pub payload: Bytes,
}

impl ResponseFrame {
    /// Build a text response.
    pub fn text(code: u8, tag: Tag, payload: impl Into<Bytes>) -> Self {
        Self {
            key: ResponseKey::new(code, tag),
            encoding: Encoding::Text,
            payload: payload.into(),
        }
    }

    /// Build a binary response.
    pub fn binary(code: u8, tag: Tag, payload: impl Into<Bytes>) -> Self {
        Self {
            key: ResponseKey::new(code, tag),
            encoding: Encoding::Binary,
            payload: payload.into(),
        }
    }

    /// Whether the device reported the command as unrecognized.
    pub fn is_unknown_command(&self) -> bool {
        self.encoding == Encoding::Text && self.key.code == UNKNOWN_COMMAND
    }
}

/// Encode a response as the device would send it.
///
/// Text wire format: `<code><tag>[,<payload>]\n`.
///
/// Binary wire format:
/// ```text
/// ┌───────────┬──────────┬──────────────┬─────────────────┐
/// │ Code (1B) │ Tag (1B) │ Length       │ Payload         │
/// │ ≥ 0x7F    │          │ (2B LE u16)  │ (Length bytes)  │
/// └───────────┴──────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_response(frame: &ResponseFrame, dst: &mut BytesMut) -> Result<()> {
    let payload = frame.payload.as_ref();
    match frame.encoding {
        Encoding::Text => {
            if payload.contains(&b'\n') {
                return Err(FrameError::PayloadContainsNewline);
            }
            dst.reserve(payload.len() + 4);
            dst.put_u8(frame.key.code);
            dst.put_u8(frame.key.tag.byte());
            if !payload.is_empty() {
                dst.put_u8(b',');
                dst.put_slice(payload);
            }
            dst.put_u8(b'\n');
        }
        Encoding::Binary => {
            if payload.len() > u16::MAX as usize {
                return Err(FrameError::PayloadTooLarge {
                    size: payload.len(),
                    max: u16::MAX as usize,
                });
            }
            dst.reserve(BINARY_HEADER_SIZE + payload.len());
            dst.put_u8(frame.key.code);
            dst.put_u8(frame.key.tag.byte());
            dst.put_u16_le(payload.len() as u16);
            dst.put_slice(payload);
        }
    }
    Ok(())
}

/// Decode one response from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success or on a malformed frame, the frame's bytes are consumed so the
/// next call starts at the following frame. A text line longer than
/// `max_line` without a newline discards the whole buffer.
///
/// Stray `\r`/`\n` bytes between frames are skipped. A comma directly after
/// the text code is tolerated (`d,a,1` decodes like `da,1`).
pub fn decode_frame(src: &mut BytesMut, max_line: usize) -> Result<Option<ResponseFrame>> {
    let skip = src
        .iter()
        .take_while(|&&b| b == b'\r' || b == b'\n')
        .count();
    src.advance(skip);

    let Some(&code) = src.first() else {
        return Ok(None);
    };

    if is_binary_code(code) {
        decode_binary(src)
    } else {
        decode_text(src, max_line)
    }
}

fn decode_binary(src: &mut BytesMut) -> Result<Option<ResponseFrame>> {
    if src.len() < BINARY_HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = u16::from_le_bytes([src[2], src[3]]) as usize;
    if src.len() < BINARY_HEADER_SIZE + payload_len {
        return Ok(None);
    }

    let code = src[0];
    let tag = Tag::from_byte(src[1]);
    src.advance(BINARY_HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(ResponseFrame::binary(code, tag, payload)))
}

fn decode_text(src: &mut BytesMut, max_line: usize) -> Result<Option<ResponseFrame>> {
    let Some(newline) = src.iter().position(|&b| b == b'\n') else {
        if src.len() > max_line {
            let len = src.len();
            src.clear();
            return Err(FrameError::LineTooLong { len, max: max_line });
        }
        return Ok(None);
    };

    let line = src.split_to(newline + 1).freeze();
    let code = line[0];

    let mut body = line.slice(1..newline);
    if body.last() == Some(&b'\r') {
        body.truncate(body.len() - 1);
    }
    if body.first() == Some(&b',') {
        body.advance(1);
    }

    let Some(&tag) = body.first() else {
        return Err(FrameError::MissingTag { code });
    };

    let payload = match body.iter().position(|&b| b == b',') {
        Some(comma) => body.slice(comma + 1..),
        None => Bytes::new(),
    };

    Ok(Some(ResponseFrame::text(code, Tag::from_byte(tag), payload)))
}

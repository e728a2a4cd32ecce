use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::ResponseKey;
use crate::error::{FrameError, Result};
use crate::tag::Tag;

/// A device command before it has been assigned a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `<LETTER><TAG>[,<arg>...]\n`, answered with the lowercase letter.
    Text { letter: u8, args: Vec<i64> },
    /// `<0x100 - LETTER><TAG><trailer>`, answered with the same code byte.
    Binary { letter: u8, trailer: Bytes },
}

/// A command with its tag applied, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub bytes: Bytes,
    pub key: ResponseKey,
}

impl Command {
    /// Text command with decimal arguments.
    pub fn text(letter: u8, args: &[i64]) -> Self {
        Self::Text {
            letter,
            args: args.to_vec(),
        }
    }

    /// Binary command terminated by a single zero byte.
    pub fn binary(letter: u8) -> Self {
        Self::binary_with(letter, Bytes::from_static(&[0]))
    }

    /// Binary command with an explicit trailer.
    pub fn binary_with(letter: u8, trailer: impl Into<Bytes>) -> Self {
        Self::Binary {
            letter,
            trailer: trailer.into(),
        }
    }

    fn letter(&self) -> u8 {
        match self {
            Self::Text { letter, .. } | Self::Binary { letter, .. } => *letter,
        }
    }

    /// The first byte this command puts on the wire.
    pub fn wire_code(&self) -> u8 {
        let upper = self.letter().to_ascii_uppercase();
        match self {
            Self::Text { .. } => upper,
            Self::Binary { .. } => 0u8.wrapping_sub(upper),
        }
    }

    /// The code the device answers this command with.
    pub fn response_code(&self) -> u8 {
        match self {
            Self::Text { .. } => self.letter().to_ascii_lowercase(),
            Self::Binary { .. } => self.wire_code(),
        }
    }

    /// Encode this command under `tag`.
    pub fn encode(&self, tag: Tag, dst: &mut BytesMut) -> Result<()> {
        if !self.letter().is_ascii_alphabetic() {
            return Err(FrameError::InvalidTypeCode(self.letter()));
        }

        dst.put_u8(self.wire_code());
        dst.put_u8(tag.byte());
        match self {
            Self::Text { args, .. } => {
                for arg in args {
                    dst.put_u8(b',');
                    dst.put_slice(arg.to_string().as_bytes());
                }
                dst.put_u8(b'\n');
            }
            Self::Binary { trailer, .. } => dst.put_slice(trailer),
        }
        Ok(())
    }

    /// Encode under `tag` and pair the bytes with the expected response key.
    pub fn with_tag(&self, tag: Tag) -> Result<EncodedCommand> {
        let mut buf = BytesMut::new();
        self.encode(tag, &mut buf)?;
        Ok(EncodedCommand {
            bytes: buf.freeze(),
            key: ResponseKey::new(self.response_code(), tag),
        })
    }
}

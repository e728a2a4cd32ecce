//! Tagged command/response framing for half-duplex command devices.
//!
//! Every command carries a type letter and a one-character tag; the device
//! echoes both back so a response can be paired with its request. Responses
//! come in two encodings, selected by the leading byte:
//! - Text: `<code><tag>,<payload>\n`
//! - Binary: `<code ≥ 0x7F><tag><len u16 LE><payload>`

pub mod codec;
pub mod command;
pub mod device;
pub mod error;
pub mod reader;
pub mod tag;
pub mod writer;

pub use codec::{
    decode_frame, encode_response, is_binary_code, Encoding, ResponseFrame, ResponseKey,
    BINARY_CODE_MIN, BINARY_HEADER_SIZE, DEFAULT_MAX_LINE, UNKNOWN_COMMAND,
};
pub use command::{Command, EncodedCommand};
pub use device::{DeviceCommand, DeviceEnd};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use tag::{Tag, TagPool, TAG_ALPHABET};
pub use writer::write_command;

//! Protocol module - Defines the wire protocol spoken with the compute server
//!
//! Every packet is little-endian and starts with a 4-byte length field:
//! - Request: length, UTF-16 selector, 2-byte terminator, 2 x f64, 2 x u32
//! - Reply: length, 10-byte tag window, then either 2 padding bytes and a
//!   stream of f64 coordinates (tag "Curve") or a UTF-16 error message

mod codec;
mod interpreter;
mod message;

pub use codec::*;
pub use interpreter::*;
pub use message::*;

use serde::{Deserialize, Serialize};

/// Width of the length field that prefixes every packet
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Width of the tag window in a reply (5 UTF-16 code units)
pub const TAG_SIZE: usize = 10;

/// Offset of the first coordinate in a success reply
pub const CURVE_BODY_OFFSET: usize = 16;

/// Sentinel written after every selector
pub const TERMINATOR: [u8; 2] = [0x00, 0x00];

/// UTF-16LE encoding of "Curve", the tag of a success reply
pub const CURVE_TAG: [u8; TAG_SIZE] = *b"C\0u\0r\0v\0e\0";

/// Control token asking the server to abandon its current computation
pub const STOP_TOKEN: &str = "Stop";

/// Bytes following the selector terminator in a request:
/// domain start (8) + domain end (8) + sample count (4) + order (4)
pub const REQUEST_TRAILER_SIZE: usize = 8 + 8 + 4 + 4;

/// Name of the channel both peers agree on at deploy time
pub const PIPE_NAME: &str = "ICS0025";

/// Which bytes the length field counts.
///
/// The server this client was written against counts the length field
/// itself; `Payload` counts only what follows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthAccounting {
    /// Length covers the bytes after the length field
    #[default]
    Payload,
    /// Length covers the whole packet, length field included
    Inclusive,
}

impl LengthAccounting {
    /// Value to write in the length field for a payload of `payload_len` bytes
    pub fn declared_for(self, payload_len: usize) -> Option<u32> {
        let declared = match self {
            LengthAccounting::Payload => payload_len,
            LengthAccounting::Inclusive => payload_len.checked_add(LENGTH_FIELD_SIZE)?,
        };
        u32::try_from(declared).ok()
    }

    /// Full packet size implied by a declared length, if the value is coherent
    pub fn frame_size(self, declared: u32) -> Option<usize> {
        let declared = declared as usize;
        match self {
            LengthAccounting::Payload => declared.checked_add(LENGTH_FIELD_SIZE),
            LengthAccounting::Inclusive => {
                if declared < LENGTH_FIELD_SIZE {
                    None
                } else {
                    Some(declared)
                }
            }
        }
    }
}

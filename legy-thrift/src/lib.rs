//! Self-describing Thrift codec.
//!
//! Two wire encodings of the same [`TypedValue`] model:
//!
//! - [`Protocol::Binary`]: fixed-width big-endian fields, 1-byte type tags,
//!   2-byte field ids, 32-bit collection counts.
//! - [`Protocol::Compact`]: zig-zag varints, 4-bit field-id deltas packed
//!   with the type tag, booleans folded into field headers.
//!
//! The codec knows nothing about what a field id *means*; that is the
//! caller's schema.
//!
//! # Round-trip
//!
//! ```rust
//! use legy_thrift::{Protocol, Struct, TypedValue, decode, encode};
//!
//! let v = TypedValue::Struct(Struct::new().with(1, "hello").with(2, true));
//! for p in [Protocol::Binary, Protocol::Compact] {
//!     let bytes = encode(&v, p).unwrap();
//!     assert_eq!(decode(&bytes, p).unwrap(), v);
//! }
//! ```
//!
//! # Hostile input
//!
//! Decoding never panics and never allocates more than the input could
//! possibly describe: collection counts are checked against the remaining
//! bytes, varints must terminate within a bounded number of bytes, and
//! nesting is capped at [`MAX_DEPTH`].

#![deny(unsafe_code)]

mod binary;
mod compact;
pub mod message;
pub mod read;
pub mod value;
mod write;

pub use message::{MessageKind, Reply, WireMessage, decode_message, encode_message};
pub use read::{Cursor, Error, Result};
pub use value::{List, MAX_DEPTH, Map, Struct, TypedValue, ValueType};

use binary::{BinaryReader, BinaryWriter};
use compact::{CompactReader, CompactWriter};
use read::ProtocolReader;
use write::ProtocolWriter;

/// Which wire encoding to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Binary,
    Compact,
}

impl Protocol {
    /// The numeric protocol id services use to name the encoding
    /// (3 = binary, 4 = compact).
    pub fn id(self) -> u8 {
        match self {
            Self::Binary  => 3,
            Self::Compact => 4,
        }
    }

    /// Guess the encoding of an envelope from its first byte.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes.first()? {
            0x80 => Some(Self::Binary),
            0x82 => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Encode a single value: one type tag followed by the value body.
///
/// Fails with [`Error::InvalidArgument`] before writing anything if the
/// value breaks a codec invariant (duplicate field ids, collection items of
/// the wrong type, oversize collections, excessive nesting).
pub fn encode(value: &TypedValue, protocol: Protocol) -> Result<Vec<u8>> {
    value.validate()?;
    Ok(match protocol {
        Protocol::Binary => {
            let mut w = BinaryWriter::new();
            write_tagged(&mut w, value);
            w.buf
        }
        Protocol::Compact => {
            let mut w = CompactWriter::new();
            write_tagged(&mut w, value);
            w.buf
        }
    })
}

/// Decode a value produced by [`encode`]. The whole buffer must be consumed.
pub fn decode(bytes: &[u8], protocol: Protocol) -> Result<TypedValue> {
    match protocol {
        Protocol::Binary  => read_tagged(&mut BinaryReader::new(bytes)),
        Protocol::Compact => read_tagged(&mut CompactReader::new(bytes)),
    }
}

fn write_tagged<W: ProtocolWriter>(w: &mut W, value: &TypedValue) {
    w.write_type_tag(value.value_type());
    write::write_value(w, value);
}

fn read_tagged<'a, R: ProtocolReader<'a>>(r: &mut R) -> Result<TypedValue> {
    let ty = r.read_type_tag()?;
    let value = read::read_value(r, ty, 0)?;
    r.cursor().finish()?;
    Ok(value)
}

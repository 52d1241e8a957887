//! Decoding: the codec [`Error`], the bounds-checked [`Cursor`], and the
//! protocol-independent value walker.

use std::collections::HashSet;
use std::fmt;

use crate::value::{List, MAX_DEPTH, Map, Struct, TypedValue, ValueType};

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors produced by the codec.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The input is not a valid encoding. `pos` is the byte offset at which
    /// the problem was detected.
    MalformedPayload { pos: usize, what: &'static str },
    /// The caller handed the encoder a value that cannot be represented.
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPayload { pos, what } => {
                write!(f, "malformed payload at byte {pos}: {what}")
            }
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for the codec.
pub type Result<T> = std::result::Result<T, Error>;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// A zero-copy cursor over an in-memory byte slice.
///
/// Every read is bounds-checked; running off the end yields
/// [`Error::MalformedPayload`], never a panic.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize { self.pos }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    /// Peek at the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> { self.buf.get(self.pos).copied() }

    /// Build an error located at the current position.
    pub fn malformed(&self, what: &'static str) -> Error {
        Error::MalformedPayload { pos: self.pos, what }
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        match self.buf.get(self.pos).copied() {
            Some(b) => { self.pos += 1; Ok(b) }
            None    => Err(self.malformed("unexpected end of buffer")),
        }
    }

    /// Borrow the next `len` bytes.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.malformed("length runs past end of buffer"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Read exactly `N` bytes.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    /// Fail unless the whole buffer has been consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(self.malformed("trailing bytes after value"));
        }
        Ok(())
    }
}

// ─── ProtocolReader ──────────────────────────────────────────────────────────

/// A field header as read from the wire.
pub(crate) struct FieldHeader {
    pub ty: ValueType,
    pub id: i16,
    /// Compact encoding folds boolean field values into the header.
    pub inline_bool: Option<bool>,
}

/// Primitive reads of one wire encoding.
pub(crate) trait ProtocolReader<'a> {
    fn cursor(&mut self) -> &mut Cursor<'a>;

    /// Smallest number of bytes any value of `ty` occupies.
    fn min_width(&self, ty: ValueType) -> usize;

    fn read_type_tag(&mut self) -> Result<ValueType>;
    fn read_bool(&mut self) -> Result<bool>;
    fn read_byte(&mut self) -> Result<i8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_double(&mut self) -> Result<f64>;
    fn read_binary(&mut self) -> Result<Vec<u8>>;

    fn read_list_begin(&mut self) -> Result<(ValueType, usize)>;
    fn read_map_begin(&mut self) -> Result<(ValueType, ValueType, usize)>;
    fn read_struct_begin(&mut self);
    fn read_struct_end(&mut self);
    /// `None` on the stop marker.
    fn read_field_begin(&mut self) -> Result<Option<FieldHeader>>;

    /// Reject a declared element count that cannot possibly fit in what is
    /// left of the buffer.
    fn check_count(&mut self, count: usize, per_item: usize) -> Result<()> {
        let cur = self.cursor();
        match count.checked_mul(per_item) {
            Some(need) if need <= cur.remaining() => Ok(()),
            _ => Err(cur.malformed("collection count exceeds remaining bytes")),
        }
    }
}

// ─── Value walker ────────────────────────────────────────────────────────────

pub(crate) fn read_value<'a, R: ProtocolReader<'a>>(
    r: &mut R,
    ty: ValueType,
    depth: usize,
) -> Result<TypedValue> {
    Ok(match ty {
        ValueType::Bool   => TypedValue::Bool(r.read_bool()?),
        ValueType::Byte   => TypedValue::Byte(r.read_byte()?),
        ValueType::I16    => TypedValue::I16(r.read_i16()?),
        ValueType::I32    => TypedValue::I32(r.read_i32()?),
        ValueType::I64    => TypedValue::I64(r.read_i64()?),
        ValueType::Double => TypedValue::Double(r.read_double()?),
        ValueType::Binary => TypedValue::Binary(r.read_binary()?),
        ValueType::List   => TypedValue::List(read_list(r, depth)?),
        ValueType::Set    => TypedValue::Set(read_list(r, depth)?),
        ValueType::Map    => TypedValue::Map(read_map(r, depth)?),
        ValueType::Struct => TypedValue::Struct(read_struct(r, depth)?),
    })
}

fn enter<'a, R: ProtocolReader<'a>>(r: &mut R, depth: usize) -> Result<usize> {
    if depth >= MAX_DEPTH {
        return Err(r.cursor().malformed("nesting too deep"));
    }
    Ok(depth + 1)
}

fn read_list<'a, R: ProtocolReader<'a>>(r: &mut R, depth: usize) -> Result<List> {
    let depth = enter(r, depth)?;
    let (elem, count) = r.read_list_begin()?;
    let width = r.min_width(elem);
    r.check_count(count, width)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_value(r, elem, depth)?);
    }
    Ok(List { elem, items })
}

fn read_map<'a, R: ProtocolReader<'a>>(r: &mut R, depth: usize) -> Result<Map> {
    let depth = enter(r, depth)?;
    let (key, value, count) = r.read_map_begin()?;
    let width = r.min_width(key) + r.min_width(value);
    r.check_count(count, width)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let k = read_value(r, key, depth)?;
        let v = read_value(r, value, depth)?;
        entries.push((k, v));
    }
    Ok(Map { key, value, entries })
}

pub(crate) fn read_struct<'a, R: ProtocolReader<'a>>(r: &mut R, depth: usize) -> Result<Struct> {
    let depth = enter(r, depth)?;
    r.read_struct_begin();
    let mut out = Struct::new();
    let mut seen = HashSet::new();
    while let Some(field) = r.read_field_begin()? {
        let value = match field.inline_bool {
            Some(b) => TypedValue::Bool(b),
            None    => read_value(r, field.ty, depth)?,
        };
        if !seen.insert(field.id) {
            return Err(r.cursor().malformed("duplicate field id"));
        }
        out.push(field.id, value);
    }
    r.read_struct_end();
    Ok(out)
}

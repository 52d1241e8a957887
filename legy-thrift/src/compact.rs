//! The compact encoding: zig-zag varints, delta field ids and booleans
//! folded into field headers.

use crate::message::MessageKind;
use crate::read::{Cursor, FieldHeader, ProtocolReader, Result};
use crate::value::ValueType;
use crate::write::ProtocolWriter;

const PROTOCOL_ID: u8 = 0x82;
const VERSION: u8 = 1;
const VERSION_MASK: u8 = 0x1f;
const KIND_SHIFT: u8 = 5;

const TAG_TRUE: u8 = 1;
const TAG_FALSE: u8 = 2;

/// Longest varint accepted for a 64-bit quantity.
const MAX_VARINT64: usize = 10;
/// Longest varint accepted for a 32-bit quantity.
const MAX_VARINT32: usize = 5;

fn zigzag32(n: i32) -> u32 { ((n << 1) ^ (n >> 31)) as u32 }
fn zigzag64(n: i64) -> u64 { ((n << 1) ^ (n >> 63)) as u64 }
fn unzigzag32(n: u32) -> i32 { ((n >> 1) as i32) ^ -((n & 1) as i32) }
fn unzigzag64(n: u64) -> i64 { ((n >> 1) as i64) ^ -((n & 1) as i64) }

// ─── Writer ──────────────────────────────────────────────────────────────────

pub(crate) struct CompactWriter {
    pub(crate) buf: Vec<u8>,
    last_fid: i16,
    fid_stack: Vec<i16>,
}

impl CompactWriter {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new(), last_fid: 0, fid_stack: Vec::new() }
    }

    pub(crate) fn write_message_begin(&mut self, name: &str, kind: MessageKind, seq_id: i32) {
        self.buf.push(PROTOCOL_ID);
        self.buf.push(((kind as u8) << KIND_SHIFT) | VERSION);
        self.write_varint(seq_id as u32 as u64);
        self.write_binary(name.as_bytes());
    }

    fn write_varint(&mut self, mut n: u64) {
        while n >= 0x80 {
            self.buf.push((n as u8 & 0x7f) | 0x80);
            n >>= 7;
        }
        self.buf.push(n as u8);
    }

    fn write_field_header(&mut self, tag: u8, id: i16) {
        let delta = id as i32 - self.last_fid as i32;
        if (1..=15).contains(&delta) {
            self.buf.push(((delta as u8) << 4) | tag);
        } else {
            self.buf.push(tag);
            self.write_i16(id);
        }
        self.last_fid = id;
    }
}

impl ProtocolWriter for CompactWriter {
    fn write_type_tag(&mut self, ty: ValueType) { self.buf.push(ty.compact_tag()); }

    fn write_bool(&mut self, v: bool) {
        self.buf.push(if v { TAG_TRUE } else { TAG_FALSE });
    }

    fn write_byte(&mut self, v: i8) { self.buf.push(v as u8); }
    fn write_i16(&mut self, v: i16) { self.write_varint(zigzag32(v as i32) as u64); }
    fn write_i32(&mut self, v: i32) { self.write_varint(zigzag32(v) as u64); }
    fn write_i64(&mut self, v: i64) { self.write_varint(zigzag64(v)); }
    fn write_double(&mut self, v: f64) { self.buf.extend(v.to_bits().to_le_bytes()); }

    fn write_binary(&mut self, v: &[u8]) {
        self.write_varint(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    fn write_list_begin(&mut self, elem: ValueType, len: usize) {
        if len < 15 {
            self.buf.push(((len as u8) << 4) | elem.compact_tag());
        } else {
            self.buf.push(0xf0 | elem.compact_tag());
            self.write_varint(len as u64);
        }
    }

    fn write_map_begin(&mut self, key: ValueType, value: ValueType, len: usize) {
        self.write_varint(len as u64);
        if len != 0 {
            self.buf.push((key.compact_tag() << 4) | value.compact_tag());
        }
    }

    fn write_struct_begin(&mut self) {
        self.fid_stack.push(self.last_fid);
        self.last_fid = 0;
    }

    fn write_struct_end(&mut self) {
        self.last_fid = self.fid_stack.pop().unwrap_or(0);
    }

    fn write_field_begin(&mut self, ty: ValueType, id: i16) {
        self.write_field_header(ty.compact_tag(), id);
    }

    fn write_bool_field(&mut self, id: i16, v: bool) {
        self.write_field_header(if v { TAG_TRUE } else { TAG_FALSE }, id);
    }

    fn write_field_stop(&mut self) { self.buf.push(0); }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

pub(crate) struct CompactReader<'a> {
    pub(crate) cur: Cursor<'a>,
    last_fid: i16,
    fid_stack: Vec<i16>,
}

impl<'a> CompactReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { cur: Cursor::from_slice(buf), last_fid: 0, fid_stack: Vec::new() }
    }

    pub(crate) fn read_message_begin(&mut self) -> Result<(String, MessageKind, i32)> {
        if self.cur.read_byte()? != PROTOCOL_ID {
            return Err(self.cur.malformed("bad protocol id"));
        }
        let b = self.cur.read_byte()?;
        if b & VERSION_MASK != VERSION {
            return Err(self.cur.malformed("bad protocol version"));
        }
        let kind = MessageKind::from_u8(b >> KIND_SHIFT)
            .ok_or_else(|| self.cur.malformed("unknown message type"))?;
        let seq_id = self.read_varint32()? as i32;
        let name = self.read_binary()?;
        let name = String::from_utf8(name)
            .map_err(|_| self.cur.malformed("method name is not UTF-8"))?;
        Ok((name, kind, seq_id))
    }

    fn read_varint(&mut self, max_bytes: usize) -> Result<u64> {
        let mut out = 0u64;
        for i in 0..max_bytes {
            let b = self.cur.read_byte()?;
            out |= ((b & 0x7f) as u64) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(out);
            }
        }
        Err(self.cur.malformed("varint does not terminate"))
    }

    fn read_varint32(&mut self) -> Result<u32> {
        let n = self.read_varint(MAX_VARINT32)?;
        u32::try_from(n).map_err(|_| self.cur.malformed("varint overflows 32 bits"))
    }

    fn read_size(&mut self) -> Result<usize> {
        let n = self.read_varint32()?;
        if n > i32::MAX as u32 {
            return Err(self.cur.malformed("size overflows i32"));
        }
        Ok(n as usize)
    }

    fn tag(&self, tag: u8) -> Result<ValueType> {
        ValueType::from_compact_tag(tag).ok_or_else(|| self.cur.malformed("unknown type tag"))
    }
}

impl<'a> ProtocolReader<'a> for CompactReader<'a> {
    fn cursor(&mut self) -> &mut Cursor<'a> { &mut self.cur }

    fn min_width(&self, ty: ValueType) -> usize {
        match ty {
            ValueType::Double => 8,
            _ => 1,
        }
    }

    fn read_type_tag(&mut self) -> Result<ValueType> {
        let b = self.cur.read_byte()?;
        self.tag(b)
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.cur.read_byte()? {
            TAG_TRUE => Ok(true),
            0 | TAG_FALSE => Ok(false),
            _ => Err(self.cur.malformed("invalid boolean byte")),
        }
    }

    fn read_byte(&mut self) -> Result<i8> { Ok(self.cur.read_byte()? as i8) }

    fn read_i16(&mut self) -> Result<i16> {
        let n = unzigzag32(self.read_varint32()?);
        i16::try_from(n).map_err(|_| self.cur.malformed("i16 out of range"))
    }

    fn read_i32(&mut self) -> Result<i32> { Ok(unzigzag32(self.read_varint32()?)) }
    fn read_i64(&mut self) -> Result<i64> { Ok(unzigzag64(self.read_varint(MAX_VARINT64)?)) }

    fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.cur.read_array()?)))
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_size()?;
        Ok(self.cur.read_slice(len)?.to_vec())
    }

    fn read_list_begin(&mut self) -> Result<(ValueType, usize)> {
        let b = self.cur.read_byte()?;
        let elem = self.tag(b & 0x0f)?;
        let len = match b >> 4 {
            15 => self.read_size()?,
            n  => n as usize,
        };
        Ok((elem, len))
    }

    fn read_map_begin(&mut self) -> Result<(ValueType, ValueType, usize)> {
        let len = self.read_size()?;
        if len == 0 {
            // Empty maps carry no type byte on the wire.
            return Ok((ValueType::Binary, ValueType::Binary, 0));
        }
        let b = self.cur.read_byte()?;
        Ok((self.tag(b >> 4)?, self.tag(b & 0x0f)?, len))
    }

    fn read_struct_begin(&mut self) {
        self.fid_stack.push(self.last_fid);
        self.last_fid = 0;
    }

    fn read_struct_end(&mut self) {
        self.last_fid = self.fid_stack.pop().unwrap_or(0);
    }

    fn read_field_begin(&mut self) -> Result<Option<FieldHeader>> {
        let b = self.cur.read_byte()?;
        if b == 0 {
            return Ok(None);
        }
        let tag = b & 0x0f;
        let ty = self.tag(tag)?;
        let id = match b >> 4 {
            0 => self.read_i16()?,
            delta => self.last_fid.checked_add(delta as i16)
                .ok_or_else(|| self.cur.malformed("field id overflows i16"))?,
        };
        self.last_fid = id;
        let inline_bool = match tag {
            TAG_TRUE  => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        };
        Ok(Some(FieldHeader { ty, id, inline_bool }))
    }
}

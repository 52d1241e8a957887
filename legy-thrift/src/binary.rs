//! The binary encoding: fixed-width big-endian integers, 1-byte type tags,
//! 2-byte field ids and 32-bit collection counts.

use crate::message::MessageKind;
use crate::read::{Cursor, FieldHeader, ProtocolReader, Result};
use crate::value::ValueType;
use crate::write::ProtocolWriter;

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

// ─── Writer ──────────────────────────────────────────────────────────────────

pub(crate) struct BinaryWriter {
    pub(crate) buf: Vec<u8>,
}

impl BinaryWriter {
    pub(crate) fn new() -> Self { Self { buf: Vec::new() } }

    /// Strict (versioned) message header.
    pub(crate) fn write_message_begin(&mut self, name: &str, kind: MessageKind, seq_id: i32) {
        let word = VERSION_1 | kind as u32;
        self.buf.extend(word.to_be_bytes());
        self.write_binary(name.as_bytes());
        self.write_i32(seq_id);
    }
}

impl ProtocolWriter for BinaryWriter {
    fn write_type_tag(&mut self, ty: ValueType) { self.buf.push(ty.binary_tag()); }
    fn write_bool(&mut self, v: bool) { self.buf.push(v as u8); }
    fn write_byte(&mut self, v: i8) { self.buf.push(v as u8); }
    fn write_i16(&mut self, v: i16) { self.buf.extend(v.to_be_bytes()); }
    fn write_i32(&mut self, v: i32) { self.buf.extend(v.to_be_bytes()); }
    fn write_i64(&mut self, v: i64) { self.buf.extend(v.to_be_bytes()); }
    fn write_double(&mut self, v: f64) { self.buf.extend(v.to_bits().to_be_bytes()); }

    fn write_binary(&mut self, v: &[u8]) {
        self.write_i32(v.len() as i32);
        self.buf.extend_from_slice(v);
    }

    fn write_list_begin(&mut self, elem: ValueType, len: usize) {
        self.write_type_tag(elem);
        self.write_i32(len as i32);
    }

    fn write_map_begin(&mut self, key: ValueType, value: ValueType, len: usize) {
        self.write_type_tag(key);
        self.write_type_tag(value);
        self.write_i32(len as i32);
    }

    fn write_struct_begin(&mut self) {}
    fn write_struct_end(&mut self) {}

    fn write_field_begin(&mut self, ty: ValueType, id: i16) {
        self.write_type_tag(ty);
        self.write_i16(id);
    }

    fn write_bool_field(&mut self, id: i16, v: bool) {
        self.write_field_begin(ValueType::Bool, id);
        self.write_bool(v);
    }

    fn write_field_stop(&mut self) { self.buf.push(0); }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

pub(crate) struct BinaryReader<'a> {
    pub(crate) cur: Cursor<'a>,
}

impl<'a> BinaryReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self { Self { cur: Cursor::from_slice(buf) } }

    /// Reads either a strict header or the legacy unversioned form.
    pub(crate) fn read_message_begin(&mut self) -> Result<(String, MessageKind, i32)> {
        let word = self.read_i32()?;
        let (name, kind) = if word < 0 {
            let word = word as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(self.cur.malformed("bad protocol version"));
            }
            let kind = MessageKind::from_u8((word & 0xff) as u8)
                .ok_or_else(|| self.cur.malformed("unknown message type"))?;
            (self.read_string()?, kind)
        } else {
            let name = self.cur.read_slice(word as usize)?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|_| self.cur.malformed("method name is not UTF-8"))?;
            let kind = MessageKind::from_u8(self.cur.read_byte()?)
                .ok_or_else(|| self.cur.malformed("unknown message type"))?;
            (name, kind)
        };
        let seq_id = self.read_i32()?;
        Ok((name, kind, seq_id))
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_binary()?;
        String::from_utf8(bytes).map_err(|_| self.cur.malformed("method name is not UTF-8"))
    }

    fn read_len(&mut self) -> Result<usize> {
        let n = self.read_i32()?;
        usize::try_from(n).map_err(|_| self.cur.malformed("negative length"))
    }

    fn read_tag(&mut self) -> Result<ValueType> {
        let tag = self.cur.read_byte()?;
        ValueType::from_binary_tag(tag).ok_or_else(|| self.cur.malformed("unknown type tag"))
    }
}

impl<'a> ProtocolReader<'a> for BinaryReader<'a> {
    fn cursor(&mut self) -> &mut Cursor<'a> { &mut self.cur }

    fn min_width(&self, ty: ValueType) -> usize {
        match ty {
            ValueType::Bool | ValueType::Byte | ValueType::Struct => 1,
            ValueType::I16 => 2,
            ValueType::I32 | ValueType::Binary => 4,
            ValueType::I64 | ValueType::Double => 8,
            ValueType::List | ValueType::Set => 5,
            ValueType::Map => 6,
        }
    }

    fn read_type_tag(&mut self) -> Result<ValueType> { self.read_tag() }

    fn read_bool(&mut self) -> Result<bool> { Ok(self.cur.read_byte()? != 0) }
    fn read_byte(&mut self) -> Result<i8> { Ok(self.cur.read_byte()? as i8) }
    fn read_i16(&mut self) -> Result<i16> { Ok(i16::from_be_bytes(self.cur.read_array()?)) }
    fn read_i32(&mut self) -> Result<i32> { Ok(i32::from_be_bytes(self.cur.read_array()?)) }
    fn read_i64(&mut self) -> Result<i64> { Ok(i64::from_be_bytes(self.cur.read_array()?)) }

    fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.cur.read_array()?)))
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        Ok(self.cur.read_slice(len)?.to_vec())
    }

    fn read_list_begin(&mut self) -> Result<(ValueType, usize)> {
        let elem = self.read_tag()?;
        let len = self.read_len()?;
        Ok((elem, len))
    }

    fn read_map_begin(&mut self) -> Result<(ValueType, ValueType, usize)> {
        let key = self.read_tag()?;
        let value = self.read_tag()?;
        let len = self.read_len()?;
        Ok((key, value, len))
    }

    fn read_struct_begin(&mut self) {}
    fn read_struct_end(&mut self) {}

    fn read_field_begin(&mut self) -> Result<Option<FieldHeader>> {
        if self.cur.peek() == Some(0) {
            self.cur.read_byte()?;
            return Ok(None);
        }
        let ty = self.read_tag()?;
        let id = self.read_i16()?;
        Ok(Some(FieldHeader { ty, id, inline_bool: None }))
    }
}

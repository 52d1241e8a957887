//! Encoding: the protocol-independent value walker over a [`ProtocolWriter`].
//!
//! Writers are infallible. Anything that could make an encoding fail is
//! rejected up front by [`TypedValue::validate`].

use crate::value::{Struct, TypedValue, ValueType};

/// Primitive writes of one wire encoding.
pub(crate) trait ProtocolWriter {
    fn write_type_tag(&mut self, ty: ValueType);
    fn write_bool(&mut self, v: bool);
    fn write_byte(&mut self, v: i8);
    fn write_i16(&mut self, v: i16);
    fn write_i32(&mut self, v: i32);
    fn write_i64(&mut self, v: i64);
    fn write_double(&mut self, v: f64);
    fn write_binary(&mut self, v: &[u8]);

    fn write_list_begin(&mut self, elem: ValueType, len: usize);
    fn write_map_begin(&mut self, key: ValueType, value: ValueType, len: usize);
    fn write_struct_begin(&mut self);
    fn write_struct_end(&mut self);
    fn write_field_begin(&mut self, ty: ValueType, id: i16);
    /// Boolean fields get their own entry point because the compact
    /// encoding stores the value in the header.
    fn write_bool_field(&mut self, id: i16, v: bool);
    fn write_field_stop(&mut self);
}

pub(crate) fn write_value<W: ProtocolWriter>(w: &mut W, v: &TypedValue) {
    match v {
        TypedValue::Bool(b)   => w.write_bool(*b),
        TypedValue::Byte(b)   => w.write_byte(*b),
        TypedValue::I16(n)    => w.write_i16(*n),
        TypedValue::I32(n)    => w.write_i32(*n),
        TypedValue::I64(n)    => w.write_i64(*n),
        TypedValue::Double(d) => w.write_double(*d),
        TypedValue::Binary(b) => w.write_binary(b),
        TypedValue::List(l) | TypedValue::Set(l) => {
            w.write_list_begin(l.elem, l.items.len());
            for item in &l.items {
                write_value(w, item);
            }
        }
        TypedValue::Map(m) => {
            w.write_map_begin(m.key, m.value, m.entries.len());
            for (k, v) in &m.entries {
                write_value(w, k);
                write_value(w, v);
            }
        }
        TypedValue::Struct(s) => write_struct(w, s),
    }
}

pub(crate) fn write_struct<W: ProtocolWriter>(w: &mut W, s: &Struct) {
    w.write_struct_begin();
    for (id, value) in s.fields() {
        match value {
            TypedValue::Bool(b) => w.write_bool_field(id, *b),
            other => {
                w.write_field_begin(other.value_type(), id);
                write_value(w, other);
            }
        }
    }
    w.write_field_stop();
    w.write_struct_end();
}

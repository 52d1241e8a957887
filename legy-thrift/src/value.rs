//! The [`TypedValue`] sum type and its collection/struct containers.

use std::collections::HashSet;

use crate::read::{Error, Result};

/// Maximum nesting of structs and collections accepted by the codec.
pub const MAX_DEPTH: usize = 64;

// ─── ValueType ───────────────────────────────────────────────────────────────

/// The eleven type tags a [`TypedValue`] can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Byte,
    I16,
    I32,
    I64,
    Double,
    Binary,
    List,
    Set,
    Map,
    Struct,
}

impl ValueType {
    /// Tag used by the binary encoding (Thrift `TType`).
    pub fn binary_tag(self) -> u8 {
        match self {
            Self::Bool   => 2,
            Self::Byte   => 3,
            Self::Double => 4,
            Self::I16    => 6,
            Self::I32    => 8,
            Self::I64    => 10,
            Self::Binary => 11,
            Self::Struct => 12,
            Self::Map    => 13,
            Self::Set    => 14,
            Self::List   => 15,
        }
    }

    /// Inverse of [`ValueType::binary_tag`]. `0` (stop) is not a value type.
    pub fn from_binary_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            2  => Self::Bool,
            3  => Self::Byte,
            4  => Self::Double,
            6  => Self::I16,
            8  => Self::I32,
            10 => Self::I64,
            11 => Self::Binary,
            12 => Self::Struct,
            13 => Self::Map,
            14 => Self::Set,
            15 => Self::List,
            _  => return None,
        })
    }

    /// Tag used by the compact encoding. Booleans use the "true" tag.
    pub fn compact_tag(self) -> u8 {
        match self {
            Self::Bool   => 1,
            Self::Byte   => 3,
            Self::I16    => 4,
            Self::I32    => 5,
            Self::I64    => 6,
            Self::Double => 7,
            Self::Binary => 8,
            Self::List   => 9,
            Self::Set    => 10,
            Self::Map    => 11,
            Self::Struct => 12,
        }
    }

    /// Inverse of [`ValueType::compact_tag`]; both boolean tags map to `Bool`.
    pub fn from_compact_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 | 2 => Self::Bool,
            3     => Self::Byte,
            4     => Self::I16,
            5     => Self::I32,
            6     => Self::I64,
            7     => Self::Double,
            8     => Self::Binary,
            9     => Self::List,
            10    => Self::Set,
            11    => Self::Map,
            12    => Self::Struct,
            _     => return None,
        })
    }
}

// ─── Containers ──────────────────────────────────────────────────────────────

/// A list or set: a declared element type and its items.
#[derive(Clone, Debug, PartialEq)]
pub struct List {
    pub elem:  ValueType,
    pub items: Vec<TypedValue>,
}

impl List {
    pub fn new(elem: ValueType) -> Self {
        Self { elem, items: Vec::new() }
    }

    pub fn with_items(elem: ValueType, items: Vec<TypedValue>) -> Self {
        Self { elem, items }
    }
}

/// A mapping with declared key and value types. Entry order is preserved.
///
/// The compact encoding drops the declared types of an empty map, so two
/// empty maps compare equal whatever their declared types.
#[derive(Clone, Debug)]
pub struct Map {
    pub key:     ValueType,
    pub value:   ValueType,
    pub entries: Vec<(TypedValue, TypedValue)>,
}

impl Map {
    pub fn new(key: ValueType, value: ValueType) -> Self {
        Self { key, value, entries: Vec::new() }
    }

    /// First value whose key is the given string.
    pub fn get_str(&self, key: &str) -> Option<&TypedValue> {
        self.entries.iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.is_empty() && other.entries.is_empty() {
            return true;
        }
        self.key == other.key && self.value == other.value && self.entries == other.entries
    }
}

/// A struct: `(field id, value)` pairs.
///
/// Field order is preserved by the codec but ignored by equality. Ids must be
/// unique; [`Struct::with`] and [`Struct::set`] replace, [`Struct::push`]
/// appends blindly and leaves uniqueness to encode-time validation.
#[derive(Clone, Debug, Default)]
pub struct Struct {
    fields: Vec<(i16, TypedValue)>,
}

impl Struct {
    pub fn new() -> Self { Self::default() }

    /// Builder form of [`Struct::set`].
    pub fn with(mut self, id: i16, value: impl Into<TypedValue>) -> Self {
        self.set(id, value);
        self
    }

    /// Set field `id`, replacing any existing value.
    pub fn set(&mut self, id: i16, value: impl Into<TypedValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(fid, _)| *fid == id) {
            Some(slot) => slot.1 = value,
            None       => self.fields.push((id, value)),
        }
    }

    /// Append without checking for an existing id.
    pub fn push(&mut self, id: i16, value: impl Into<TypedValue>) {
        self.fields.push((id, value.into()));
    }

    pub fn get(&self, id: i16) -> Option<&TypedValue> {
        self.fields.iter().find(|(fid, _)| *fid == id).map(|(_, v)| v)
    }

    pub fn get_str(&self, id: i16) -> Option<&str> { self.get(id)?.as_str() }
    pub fn get_bytes(&self, id: i16) -> Option<&[u8]> { self.get(id)?.as_bytes() }
    pub fn get_bool(&self, id: i16) -> Option<bool> { self.get(id)?.as_bool() }
    pub fn get_i32(&self, id: i16) -> Option<i32> { self.get(id)?.as_i32() }
    pub fn get_i64(&self, id: i16) -> Option<i64> { self.get(id)?.as_i64() }
    pub fn get_struct(&self, id: i16) -> Option<&Struct> { self.get(id)?.as_struct() }
    pub fn get_list(&self, id: i16) -> Option<&[TypedValue]> { self.get(id)?.as_list() }
    pub fn get_map(&self, id: i16) -> Option<&Map> { self.get(id)?.as_map() }

    pub fn fields(&self) -> impl Iterator<Item = (i16, &TypedValue)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    pub fn into_fields(self) -> Vec<(i16, TypedValue)> { self.fields }

    pub fn len(&self) -> usize { self.fields.len() }
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }
}

impl Struct {
    fn sorted_fields(&self) -> Vec<&(i16, TypedValue)> {
        let mut out: Vec<_> = self.fields.iter().collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self.sorted_fields() == other.sorted_fields()
    }
}

// ─── TypedValue ──────────────────────────────────────────────────────────────

/// A self-describing value: the closed set of kinds the wire format can carry.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    Byte(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    /// Byte string. Thrift `string` fields are UTF-8 in this variant.
    Binary(Vec<u8>),
    List(List),
    Set(List),
    Map(Map),
    Struct(Struct),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_)   => ValueType::Bool,
            Self::Byte(_)   => ValueType::Byte,
            Self::I16(_)    => ValueType::I16,
            Self::I32(_)    => ValueType::I32,
            Self::I64(_)    => ValueType::I64,
            Self::Double(_) => ValueType::Double,
            Self::Binary(_) => ValueType::Binary,
            Self::List(_)   => ValueType::List,
            Self::Set(_)    => ValueType::Set,
            Self::Map(_)    => ValueType::Map,
            Self::Struct(_) => ValueType::Struct,
        }
    }

    /// Build an integer value of the given width, rejecting out-of-range input.
    pub fn from_i64(ty: ValueType, v: i64) -> Result<Self> {
        let out_of_range = || Error::InvalidArgument(format!("{v} does not fit in {ty:?}"));
        match ty {
            ValueType::Byte => i8::try_from(v).map(Self::Byte).map_err(|_| out_of_range()),
            ValueType::I16  => i16::try_from(v).map(Self::I16).map_err(|_| out_of_range()),
            ValueType::I32  => i32::try_from(v).map(Self::I32).map_err(|_| out_of_range()),
            ValueType::I64  => Ok(Self::I64(v)),
            _ => Err(Error::InvalidArgument(format!("{ty:?} is not an integer type"))),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { Self::Bool(b) => Some(*b), _ => None }
    }

    /// Any integer variant, widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(*v as i64),
            Self::I16(v)  => Some(*v as i64),
            Self::I32(v)  => Some(*v as i64),
            Self::I64(v)  => Some(*v),
            _ => None,
        }
    }

    /// Any integer variant that fits in `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self { Self::Binary(b) => Some(b), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self { Self::Struct(s) => Some(s), _ => None }
    }

    pub fn as_list(&self) -> Option<&[TypedValue]> {
        match self {
            Self::List(l) | Self::Set(l) => Some(&l.items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self { Self::Map(m) => Some(m), _ => None }
    }

    /// Check every invariant the encoders rely on, so that encoding can
    /// never fail halfway through.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        match self {
            Self::Binary(b) => check_len(b.len(), "binary"),
            Self::List(l) | Self::Set(l) => {
                let depth = nest(depth)?;
                check_len(l.items.len(), "list")?;
                for item in &l.items {
                    expect_type(l.elem, item)?;
                    item.validate_at(depth)?;
                }
                Ok(())
            }
            Self::Map(m) => {
                let depth = nest(depth)?;
                check_len(m.entries.len(), "map")?;
                for (k, v) in &m.entries {
                    expect_type(m.key, k)?;
                    expect_type(m.value, v)?;
                    k.validate_at(depth)?;
                    v.validate_at(depth)?;
                }
                Ok(())
            }
            Self::Struct(s) => {
                let depth = nest(depth)?;
                let mut seen = HashSet::with_capacity(s.fields.len());
                for (id, v) in &s.fields {
                    if !seen.insert(*id) {
                        return Err(Error::InvalidArgument(format!("duplicate field id {id}")));
                    }
                    v.validate_at(depth)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn nest(depth: usize) -> Result<usize> {
    if depth >= MAX_DEPTH {
        return Err(Error::InvalidArgument(format!("nesting deeper than {MAX_DEPTH}")));
    }
    Ok(depth + 1)
}

fn check_len(len: usize, what: &str) -> Result<()> {
    if len > i32::MAX as usize {
        return Err(Error::InvalidArgument(format!("{what} of {len} elements is too long")));
    }
    Ok(())
}

fn expect_type(declared: ValueType, v: &TypedValue) -> Result<()> {
    if v.value_type() != declared {
        return Err(Error::InvalidArgument(format!(
            "element of type {:?} in collection declared as {declared:?}",
            v.value_type()
        )));
    }
    Ok(())
}

// ─── Conversions ─────────────────────────────────────────────────────────────

impl From<bool> for TypedValue { fn from(v: bool) -> Self { Self::Bool(v) } }
impl From<i8> for TypedValue { fn from(v: i8) -> Self { Self::Byte(v) } }
impl From<i16> for TypedValue { fn from(v: i16) -> Self { Self::I16(v) } }
impl From<i32> for TypedValue { fn from(v: i32) -> Self { Self::I32(v) } }
impl From<i64> for TypedValue { fn from(v: i64) -> Self { Self::I64(v) } }
impl From<f64> for TypedValue { fn from(v: f64) -> Self { Self::Double(v) } }
impl From<Vec<u8>> for TypedValue { fn from(v: Vec<u8>) -> Self { Self::Binary(v) } }
impl From<&[u8]> for TypedValue { fn from(v: &[u8]) -> Self { Self::Binary(v.to_vec()) } }
impl From<String> for TypedValue { fn from(v: String) -> Self { Self::Binary(v.into_bytes()) } }
impl From<&str> for TypedValue { fn from(v: &str) -> Self { Self::Binary(v.as_bytes().to_vec()) } }
impl From<Struct> for TypedValue { fn from(v: Struct) -> Self { Self::Struct(v) } }
impl From<Map> for TypedValue { fn from(v: Map) -> Self { Self::Map(v) } }
impl From<List> for TypedValue { fn from(v: List) -> Self { Self::List(v) } }

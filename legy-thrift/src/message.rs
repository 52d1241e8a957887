//! RPC envelopes: [`WireMessage`] framing and [`Reply`] interpretation.

use crate::binary::{BinaryReader, BinaryWriter};
use crate::compact::{CompactReader, CompactWriter};
use crate::read::{Result, read_struct};
use crate::value::{Struct, TypedValue};
use crate::write::write_struct;
use crate::{Protocol, read::ProtocolReader};

/// The message-type nibble carried in every envelope header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Call      = 1,
    Reply     = 2,
    Exception = 3,
    Oneway    = 4,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Call,
            2 => Self::Reply,
            3 => Self::Exception,
            4 => Self::Oneway,
            _ => return None,
        })
    }
}

/// One RPC call or reply on the wire.
///
/// The sequence id is assigned by the caller and echoed by the remote so
/// replies can be correlated with calls.
#[derive(Clone, Debug, PartialEq)]
pub struct WireMessage {
    pub name:   String,
    pub kind:   MessageKind,
    pub seq_id: i32,
    pub body:   Struct,
}

impl WireMessage {
    /// A call message wrapping `args`.
    pub fn call(name: impl Into<String>, seq_id: i32, args: Struct) -> Self {
        Self { name: name.into(), kind: MessageKind::Call, seq_id, body: args }
    }

    /// Interpret the body of a reply.
    ///
    /// Replies put the result in field 0 and declared exceptions in any other
    /// field; exception messages carry `{1: message, 2: type}`.
    pub fn into_reply(self) -> Reply {
        if self.kind == MessageKind::Exception {
            return Reply::Application {
                message: self.body.get_str(1).unwrap_or_default().to_string(),
                code:    self.body.get_i32(2).unwrap_or_default(),
            };
        }
        let mut fields = self.body.into_fields().into_iter();
        match fields.next() {
            None => Reply::Success(None),
            Some((0, value)) => Reply::Success(Some(value)),
            Some((field, TypedValue::Struct(body))) => Reply::Exception { field, body },
            Some((field, _)) => Reply::Exception { field, body: Struct::new() },
        }
    }
}

/// The decoded outcome of a call.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// The call succeeded; `None` for `void` methods.
    Success(Option<TypedValue>),
    /// The service raised one of the method's declared exceptions.
    Exception { field: i16, body: Struct },
    /// The service rejected the call at the framework level.
    Application { message: String, code: i32 },
}

/// Serialize an envelope.
pub fn encode_message(msg: &WireMessage, protocol: Protocol) -> Result<Vec<u8>> {
    TypedValue::Struct(msg.body.clone()).validate()?;
    Ok(match protocol {
        Protocol::Binary => {
            let mut w = BinaryWriter::new();
            w.write_message_begin(&msg.name, msg.kind, msg.seq_id);
            write_struct(&mut w, &msg.body);
            w.buf
        }
        Protocol::Compact => {
            let mut w = CompactWriter::new();
            w.write_message_begin(&msg.name, msg.kind, msg.seq_id);
            write_struct(&mut w, &msg.body);
            w.buf
        }
    })
}

/// Parse an envelope. Trailing bytes are rejected.
pub fn decode_message(bytes: &[u8], protocol: Protocol) -> Result<WireMessage> {
    match protocol {
        Protocol::Binary => {
            let mut r = BinaryReader::new(bytes);
            let (name, kind, seq_id) = r.read_message_begin()?;
            finish(&mut r, name, kind, seq_id)
        }
        Protocol::Compact => {
            let mut r = CompactReader::new(bytes);
            let (name, kind, seq_id) = r.read_message_begin()?;
            finish(&mut r, name, kind, seq_id)
        }
    }
}

fn finish<'a, R: ProtocolReader<'a>>(
    r: &mut R,
    name: String,
    kind: MessageKind,
    seq_id: i32,
) -> Result<WireMessage> {
    let body = read_struct(r, 0)?;
    r.cursor().finish()?;
    Ok(WireMessage { name, kind, seq_id, body })
}

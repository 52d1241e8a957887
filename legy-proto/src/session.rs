//! Call packing and reply unpacking.

use legy_thrift::{
    MessageKind, Protocol, Reply, Struct, TypedValue, WireMessage, decode_message, encode_message,
};

use crate::error::{Error, Result, ServiceException};

/// An RPC call before it is assigned a sequence id.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub args:   Struct,
}

impl Call {
    pub fn new(method: &'static str, args: Struct) -> Self {
        Self { method, args }
    }
}

/// Assigns sequence ids to outgoing calls.
///
/// A `Session` is cheap to create; one per channel is enough.
///
/// # Example
///
/// ```rust
/// use legy_proto::{Call, Session};
/// use legy_thrift::{Protocol, Struct};
///
/// let mut session = Session::new();
/// let msg = session.pack(Call::new("getProfile", Struct::new()));
/// let bytes = legy_thrift::encode_message(&msg, Protocol::Compact).unwrap();
/// assert_eq!(bytes[0], 0x82);
/// ```
#[derive(Debug, Default)]
pub struct Session {
    seq_id: i32,
}

impl Session {
    pub fn new() -> Self { Self::default() }

    /// Return the next sequence id. Wraps to 1 after `i32::MAX`.
    pub fn next_seq_id(&mut self) -> i32 {
        self.seq_id = match self.seq_id.checked_add(1) {
            Some(n) => n,
            None    => 1,
        };
        self.seq_id
    }

    /// Wrap `call` in an envelope carrying a fresh sequence id.
    pub fn pack(&mut self, call: Call) -> WireMessage {
        let seq_id = self.next_seq_id();
        WireMessage::call(call.method, seq_id, call.args)
    }
}

/// Serialize a packed call.
pub fn encode_call(msg: &WireMessage, protocol: Protocol) -> Result<Vec<u8>> {
    Ok(encode_message(msg, protocol)?)
}

/// Decode the reply to `call` and return its success value.
///
/// A reply whose sequence id is non-zero and differs from the call's is
/// rejected; some endpoints always echo zero.
pub fn read_reply(bytes: &[u8], protocol: Protocol, call: &WireMessage) -> Result<Option<TypedValue>> {
    let protocol = Protocol::detect(bytes).unwrap_or(protocol);
    let msg = decode_message(bytes, protocol)?;
    if msg.kind != MessageKind::Reply && msg.kind != MessageKind::Exception {
        return Err(Error::UnexpectedReply(format!("message kind {:?}", msg.kind)));
    }
    if msg.seq_id != 0 && msg.seq_id != call.seq_id {
        return Err(Error::UnexpectedReply(format!(
            "sequence id {} does not match call {}", msg.seq_id, call.seq_id
        )));
    }
    match msg.into_reply() {
        Reply::Success(value) => Ok(value),
        Reply::Exception { field, body } => {
            Err(Error::Service(ServiceException::from_struct(field, &body)))
        }
        Reply::Application { message, code } => Err(Error::Application { message, code }),
    }
}

/// Like [`read_reply`] but requires a struct result.
pub fn read_struct_reply(bytes: &[u8], protocol: Protocol, call: &WireMessage) -> Result<Struct> {
    match read_reply(bytes, protocol, call)? {
        Some(TypedValue::Struct(s)) => Ok(s),
        None => Ok(Struct::new()),
        Some(other) => Err(Error::UnexpectedReply(format!(
            "expected struct, got {:?}", other.value_type()
        ))),
    }
}

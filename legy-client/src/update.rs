//! Events delivered to handlers registered on a [`crate::Dispatcher`].
//!
//! Each [`Event`] wraps one decoded [`Operation`] from the stream. Message
//! events also carry the [`ReplyTarget`] an answer should be addressed to,
//! worked out against the account the session is logged in as.

use chrono::{DateTime, TimeZone, Utc};
use legy_proto::{Message, OpKind, Operation, ReplyTarget};

// ─── Event ────────────────────────────────────────────────────────────────────

/// One operation from the stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    op:           Operation,
    reply_target: Option<ReplyTarget>,
}

impl Event {
    pub(crate) fn new(op: Operation, own_id: Option<&str>) -> Self {
        let reply_target = op.message.as_ref().map(|m| m.reply_target(own_id));
        Self { op, reply_target }
    }

    pub fn kind(&self) -> OpKind { self.op.kind }

    /// Stream revision; `-1` for operations the service does not version.
    pub fn revision(&self) -> i64 { self.op.revision }

    /// When the service recorded the operation, if it said.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.op.created_time <= 0 {
            return None;
        }
        Utc.timestamp_millis_opt(self.op.created_time).single()
    }

    /// The three free-form parameters, whose meaning depends on the kind.
    pub fn params(&self) -> [Option<&str>; 3] {
        [self.op.param1.as_deref(), self.op.param2.as_deref(), self.op.param3.as_deref()]
    }

    pub fn message(&self) -> Option<&Message> { self.op.message.as_ref() }

    /// The message text, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        self.message()?.text.as_deref()
    }

    /// Where to send an answer. `None` unless the event carries a message.
    pub fn reply_target(&self) -> Option<&ReplyTarget> { self.reply_target.as_ref() }

    /// The decoded operation as received.
    pub fn raw(&self) -> &Operation { &self.op }

    pub fn into_raw(self) -> Operation { self.op }
}

// ─── EventFilter ──────────────────────────────────────────────────────────────

/// Which events a handler is registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventFilter {
    Kind(OpKind),
    /// Every event.
    Any,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Kind(k) => *k == event.kind(),
            Self::Any     => true,
        }
    }
}

impl From<OpKind> for EventFilter {
    fn from(kind: OpKind) -> Self { Self::Kind(kind) }
}

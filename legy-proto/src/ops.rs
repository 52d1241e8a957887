//! Operation stream: poll calls, decoding and cursor bookkeeping.

use legy_thrift::{Struct, TypedValue};

use crate::error::{Error, Result};
use crate::schema::{self, fetch_ops, message, method, operation};
use crate::session::Call;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// How far through the operation stream a poller has consumed.
///
/// Lives in memory only. Starting from [`PollCursor::default`] asks the
/// service for whatever it considers current, which may skip or repeat
/// operations around a restart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PollCursor {
    pub revision:            i64,
    pub global_revision:     i64,
    pub individual_revision: i64,
}

impl PollCursor {
    pub fn at(revision: i64) -> Self {
        Self { revision, ..Self::default() }
    }

    /// Apply one batch.
    ///
    /// Returns the operations worth delivering, in server order, and the
    /// cursor to use for the next poll. End-of-operation markers only move
    /// the cursor. Operations at or below the current revision were seen
    /// before and are dropped.
    pub fn advance(&self, ops: Vec<Operation>) -> (Vec<Operation>, PollCursor) {
        let mut next = *self;
        let mut fresh = Vec::with_capacity(ops.len());

        for op in ops {
            if op.kind == OpKind::EndOfOperation {
                if let Some(g) = op.param1.as_deref().and_then(parse_marker) {
                    next.global_revision = g;
                }
                if let Some(i) = op.param2.as_deref().and_then(parse_marker) {
                    next.individual_revision = i;
                }
                next.revision = next.revision.max(op.revision);
                continue;
            }
            if op.revision > 0 && op.revision <= next.revision {
                log::trace!("[legy] skipping already-seen op rev={}", op.revision);
                continue;
            }
            next.revision = next.revision.max(op.revision);
            fresh.push(op);
        }
        (fresh, next)
    }
}

// Markers carry `<revision>\x1e<other>`; only the first part matters.
fn parse_marker(param: &str) -> Option<i64> {
    param.split(schema::REVISION_SEPARATOR).next()?.trim().parse().ok()
}

// ─── Calls ───────────────────────────────────────────────────────────────────

/// Ask for the newest revision, used to seed a fresh cursor.
pub fn last_revision() -> Call {
    Call::new(method::GET_LAST_OP_REVISION, Struct::new())
}

pub fn read_last_revision(reply: Option<TypedValue>) -> Result<i64> {
    reply.as_ref()
        .and_then(TypedValue::as_i64)
        .ok_or_else(|| Error::UnexpectedReply("getLastOpRevision reply is not an integer".into()))
}

/// The long-poll call.
pub fn fetch(cursor: &PollCursor, count: i32) -> Call {
    let args = Struct::new()
        .with(fetch_ops::LOCAL_REVISION, cursor.revision)
        .with(fetch_ops::COUNT, count)
        .with(fetch_ops::GLOBAL_REVISION, cursor.global_revision)
        .with(fetch_ops::INDIVIDUAL_REVISION, cursor.individual_revision);
    Call::new(method::FETCH_OPS, args)
}

/// Decode a `fetchOps` reply. An absent result is an empty batch.
pub fn read_batch(reply: Option<TypedValue>) -> Result<Vec<Operation>> {
    let Some(value) = reply else { return Ok(Vec::new()) };
    let items = value.as_list()
        .ok_or_else(|| Error::UnexpectedReply("fetchOps reply is not a list".into()))?;
    items.iter()
        .map(|item| {
            item.as_struct()
                .ok_or_else(|| Error::UnexpectedReply("operation is not a struct".into()))
                .and_then(Operation::from_struct)
        })
        .collect()
}

// ─── OpKind ──────────────────────────────────────────────────────────────────

/// Operation type codes this crate gives names to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpKind {
    EndOfOperation,
    UpdateProfile,
    NotifiedUpdateProfile,
    NotifiedAddContact,
    NotifiedInviteIntoGroup,
    NotifiedLeaveGroup,
    NotifiedAcceptGroupInvitation,
    NotifiedKickoutFromGroup,
    NotifiedInviteIntoRoom,
    NotifiedLeaveRoom,
    SendMessage,
    ReceiveMessage,
    NotifiedReadMessage,
    Other(i32),
}

impl OpKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            0  => Self::EndOfOperation,
            1  => Self::UpdateProfile,
            2  => Self::NotifiedUpdateProfile,
            5  => Self::NotifiedAddContact,
            13 => Self::NotifiedInviteIntoGroup,
            15 => Self::NotifiedLeaveGroup,
            17 => Self::NotifiedAcceptGroupInvitation,
            19 => Self::NotifiedKickoutFromGroup,
            22 => Self::NotifiedInviteIntoRoom,
            24 => Self::NotifiedLeaveRoom,
            25 => Self::SendMessage,
            26 => Self::ReceiveMessage,
            55 => Self::NotifiedReadMessage,
            n  => Self::Other(n),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::EndOfOperation                => 0,
            Self::UpdateProfile                 => 1,
            Self::NotifiedUpdateProfile         => 2,
            Self::NotifiedAddContact            => 5,
            Self::NotifiedInviteIntoGroup       => 13,
            Self::NotifiedLeaveGroup            => 15,
            Self::NotifiedAcceptGroupInvitation => 17,
            Self::NotifiedKickoutFromGroup      => 19,
            Self::NotifiedInviteIntoRoom        => 22,
            Self::NotifiedLeaveRoom             => 24,
            Self::SendMessage                   => 25,
            Self::ReceiveMessage                => 26,
            Self::NotifiedReadMessage           => 55,
            Self::Other(n)                      => n,
        }
    }

    /// Whether operations of this kind carry a [`Message`].
    pub fn carries_message(self) -> bool {
        matches!(self, Self::SendMessage | Self::ReceiveMessage)
    }
}

// ─── Operation ───────────────────────────────────────────────────────────────

/// One entry of the operation stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub revision:     i64,
    /// Milliseconds since the Unix epoch.
    pub created_time: i64,
    pub kind:         OpKind,
    pub req_seq:      i32,
    pub status:       Option<i32>,
    pub param1:       Option<String>,
    pub param2:       Option<String>,
    pub param3:       Option<String>,
    pub message:      Option<Message>,
}

impl Operation {
    pub fn from_struct(s: &Struct) -> Result<Self> {
        let kind = s.get_i32(operation::KIND)
            .map(OpKind::from_code)
            .ok_or_else(|| Error::UnexpectedReply("operation without type".into()))?;
        let message = s.get_struct(operation::MESSAGE)
            .map(Message::from_struct)
            .transpose()?;
        let text = |id| s.get_str(id).map(str::to_string);
        Ok(Self {
            revision:     s.get_i64(operation::REVISION).unwrap_or(-1),
            created_time: s.get_i64(operation::CREATED_TIME).unwrap_or(0),
            kind,
            req_seq:      s.get_i32(operation::REQ_SEQ).unwrap_or(0),
            status:       s.get_i32(operation::STATUS),
            param1:       text(operation::PARAM1),
            param2:       text(operation::PARAM2),
            param3:       text(operation::PARAM3),
            message,
        })
    }
}

// ─── Message ─────────────────────────────────────────────────────────────────

/// Conversation type, also inferable from the first letter of an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ToType {
    User,
    Room,
    Group,
    Square,
    SquareChat,
    SquareMember,
    Bot,
    Other(i32),
}

impl ToType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::User,
            1 => Self::Room,
            2 => Self::Group,
            3 => Self::Square,
            4 => Self::SquareChat,
            5 => Self::SquareMember,
            6 => Self::Bot,
            n => Self::Other(n),
        }
    }

    /// Guess from an id prefix: `u` user, `r` room, `c` group, `s` square,
    /// `m` square chat, `p` square member, `v` bot.
    pub fn from_id(id: &str) -> Option<Self> {
        Some(match id.chars().next()? {
            'u' => Self::User,
            'r' => Self::Room,
            'c' => Self::Group,
            's' => Self::Square,
            'm' => Self::SquareChat,
            'p' => Self::SquareMember,
            'v' => Self::Bot,
            _ => return None,
        })
    }

    /// Multi-party conversations are addressed by the conversation id.
    pub fn is_multi_party(self) -> bool {
        matches!(self, Self::Room | Self::Group | Self::Square | Self::SquareChat)
    }
}

/// A chat message attached to a send/receive operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id:           String,
    pub from:         String,
    pub to:           String,
    pub to_type:      ToType,
    pub created_time: i64,
    pub text:         Option<String>,
    pub content_type: i32,
    pub metadata:     Vec<(String, String)>,
}

/// Where an answer to a message should go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyTarget {
    pub to:         String,
    pub to_type:    ToType,
    /// The message being answered.
    pub related_id: String,
}

impl Message {
    pub fn from_struct(s: &Struct) -> Result<Self> {
        let to = s.get_str(message::TO).unwrap_or_default().to_string();
        let to_type = s.get_i32(message::TO_TYPE)
            .map(ToType::from_code)
            .or_else(|| ToType::from_id(&to))
            .unwrap_or(ToType::User);
        let metadata = s.get_map(message::CONTENT_METADATA)
            .map(|m| {
                m.entries.iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            id:           s.get_str(message::ID).unwrap_or_default().to_string(),
            from:         s.get_str(message::FROM).unwrap_or_default().to_string(),
            to,
            to_type,
            created_time: s.get_i64(message::CREATED_TIME).unwrap_or(0),
            text:         s.get_str(message::TEXT).map(str::to_string),
            content_type: s.get_i32(message::CONTENT_TYPE).unwrap_or(0),
            metadata,
        })
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Where a reply belongs, from the point of view of `own_id`.
    ///
    /// Group-like conversations answer to the conversation. One-to-one
    /// messages answer to the other party: the recipient when we sent it,
    /// the sender otherwise.
    pub fn reply_target(&self, own_id: Option<&str>) -> ReplyTarget {
        let sent_by_us = own_id.is_some_and(|me| me == self.from);
        let (to, to_type) = if self.to_type.is_multi_party() || sent_by_us {
            (self.to.clone(), self.to_type)
        } else {
            let ty = ToType::from_id(&self.from).unwrap_or(ToType::User);
            (self.from.clone(), ty)
        };
        ReplyTarget { to, to_type, related_id: self.id.clone() }
    }
}

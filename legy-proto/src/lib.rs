//! Sans-IO protocol layer for the legy client.
//!
//! This crate handles:
//! * Call packing and reply unpacking (sequence ids, service exceptions)
//! * The device pairing steps and the key exchange that ends them
//! * Credentials and their opaque export format
//! * Account calls (token validation, refresh, logout)
//! * Operation stream decoding and poll cursor bookkeeping
//!
//! Nothing here performs I/O. Every step returns a [`Call`] to send and
//! accepts the decoded reply; bring your own transport.

#![deny(unsafe_code)]

pub mod account;
pub mod credential;
pub mod error;
pub mod ops;
pub mod pairing;
pub mod schema;
pub mod session;

pub use account::Profile;
pub use credential::Credential;
pub use error::{Error, Result, ServiceException};
pub use ops::{Message, OpKind, Operation, PollCursor, ReplyTarget, ToType};
pub use pairing::{ApprovalStatus, PairingChallenge};
pub use session::{Call, Session, encode_call, read_reply, read_struct_reply};

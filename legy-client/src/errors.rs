//! Error types for legy-client.

use std::{fmt, io};

use legy_proto::ServiceException;

use crate::device::DeviceType;
use crate::session::AuthState;

// ─── TransportError ───────────────────────────────────────────────────────────

/// Why a request did not produce a successful response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be made or broke mid-request.
    Disconnected,
    /// No response within the request deadline.
    Timeout,
    /// The service answered with a non-success status.
    Status { code: u16, body: Vec<u8> },
    /// The transport was closed locally.
    Closed,
}

/// Failure to move bytes. The transport never retries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    pub kind:   TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Disconnected, detail: detail.into() }
    }

    pub fn timeout() -> Self {
        Self { kind: TransportErrorKind::Timeout, detail: String::new() }
    }

    pub fn status(code: u16, body: Vec<u8>) -> Self {
        Self { kind: TransportErrorKind::Status { code, body }, detail: String::new() }
    }

    pub fn closed() -> Self {
        Self { kind: TransportErrorKind::Closed, detail: String::new() }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            TransportErrorKind::Status { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TransportErrorKind::Disconnected => write!(f, "disconnected: {}", self.detail),
            TransportErrorKind::Timeout      => write!(f, "request timed out"),
            TransportErrorKind::Status { code, body } => {
                write!(f, "HTTP status {code} ({} byte body)", body.len())
            }
            TransportErrorKind::Closed       => write!(f, "transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any call that talks to the service.
#[derive(Debug)]
pub enum InvocationError {
    /// The request never produced a reply.
    Transport(TransportError),
    /// The reply could not be decoded.
    Malformed(String),
    /// The service raised a declared exception.
    Service(ServiceException),
    /// The reply decoded but made no sense for the call.
    Protocol(legy_proto::Error),
    /// The client shut down while the call was pending.
    Dropped,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Malformed(s) => write!(f, "malformed reply: {s}"),
            Self::Service(e)   => write!(f, "{e}"),
            Self::Protocol(e)  => write!(f, "{e}"),
            Self::Dropped      => write!(f, "request dropped"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Service(e)   => Some(e),
            Self::Protocol(e)  => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for InvocationError {
    fn from(e: TransportError) -> Self { Self::Transport(e) }
}

impl From<legy_proto::Error> for InvocationError {
    fn from(e: legy_proto::Error) -> Self {
        match e {
            legy_proto::Error::Codec(c)   => Self::Malformed(c.to_string()),
            legy_proto::Error::Service(s) => Self::Service(s),
            other => Self::Protocol(other),
        }
    }
}

impl From<legy_thrift::Error> for InvocationError {
    fn from(e: legy_thrift::Error) -> Self { Self::Malformed(e.to_string()) }
}

impl InvocationError {
    /// Whether this failure means the credential is no longer accepted.
    pub fn is_auth_failure(&self, codes: &[i32], statuses: &[u16]) -> bool {
        match self {
            Self::Service(e) => codes.contains(&e.code),
            Self::Transport(e) => e.status_code().is_some_and(|s| statuses.contains(&s)),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError { kind: TransportErrorKind::Timeout, .. }))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Transport(TransportError { kind: TransportErrorKind::Disconnected, .. }))
    }

    /// The service exception code, if this is one.
    pub fn service_code(&self) -> Option<i32> {
        match self {
            Self::Service(e) => Some(e.code),
            _ => None,
        }
    }
}

// ─── AuthError ────────────────────────────────────────────────────────────────

/// Errors returned by session-state transitions.
#[derive(Debug)]
pub enum AuthError {
    /// The pairing request was declined on the approving device.
    PairingRejected,
    /// The challenge expired, or approval did not arrive in time.
    PairingExpired,
    /// The approval reply could not be turned into a credential.
    KeyExchangeFailed(String),
    /// The service refused the presented credential.
    InvalidCredential,
    /// Already authenticated; log out first.
    AlreadyAuthenticated,
    /// The operation is not valid in the current state.
    InvalidState { expected: AuthState, actual: AuthState },
    /// Token refresh is disabled for primary device types.
    PrimaryDevice(DeviceType),
    /// The credential store failed.
    Store(io::Error),
    /// Any other failure talking to the service.
    Invocation(InvocationError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PairingRejected      => write!(f, "pairing rejected"),
            Self::PairingExpired       => write!(f, "pairing expired"),
            Self::KeyExchangeFailed(s) => write!(f, "key exchange failed: {s}"),
            Self::InvalidCredential    => write!(f, "credential rejected"),
            Self::AlreadyAuthenticated => write!(f, "already authenticated"),
            Self::InvalidState { expected, actual } => {
                write!(f, "expected state {expected:?}, session is {actual:?}")
            }
            Self::PrimaryDevice(d)     => write!(f, "token refresh is disabled for primary device {d}"),
            Self::Store(e)             => write!(f, "credential store: {e}"),
            Self::Invocation(e)        => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e)      => Some(e),
            Self::Invocation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InvocationError> for AuthError {
    fn from(e: InvocationError) -> Self { Self::Invocation(e) }
}

impl From<io::Error> for AuthError {
    fn from(e: io::Error) -> Self { Self::Store(e) }
}

// ─── HandlerError ─────────────────────────────────────────────────────────────

/// Failure reported by an event handler.
///
/// A panicking handler is reported as a `HandlerError` too.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self { message: message.to_string() }
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let what = payload.downcast_ref::<&str>().copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        Self { message: format!("handler panicked: {what}") }
    }

    pub fn message(&self) -> &str { &self.message }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self { Self { message } }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self { Self::new(message) }
}

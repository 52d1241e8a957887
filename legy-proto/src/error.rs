//! Errors produced while building requests or interpreting replies.

use std::fmt;

use legy_crypto::CryptoError;
use legy_thrift::Struct;

use crate::schema::exception;

/// A declared exception raised by the remote service.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceException {
    /// Reply field the exception arrived in.
    pub field:  i16,
    /// Service-defined error code.
    pub code:   i32,
    /// Human-readable reason, possibly empty.
    pub reason: String,
    /// Extra key/value parameters, if any.
    pub parameters: Vec<(String, String)>,
}

impl ServiceException {
    /// Read the conventional `{1: code, 2: reason, 3: map<string,string>}` layout.
    pub fn from_struct(field: i16, body: &Struct) -> Self {
        let parameters = body.get_map(exception::PARAMETERS)
            .map(|m| {
                m.entries.iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            field,
            code:   body.get_i32(exception::CODE).unwrap_or(-1),
            reason: body.get_str(exception::REASON).unwrap_or_default().to_string(),
            parameters,
        }
    }
}

impl fmt::Display for ServiceException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service exception {}: {}", self.code, self.reason)
    }
}

impl std::error::Error for ServiceException {}

/// Protocol-layer errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The payload could not be decoded.
    Codec(legy_thrift::Error),
    /// The service raised a declared exception.
    Service(ServiceException),
    /// The service rejected the call itself (unknown method, bad framing).
    Application { message: String, code: i32 },
    /// The reply decoded but does not have the expected shape.
    UnexpectedReply(String),
    /// Key agreement or payload decryption failed.
    Crypto(CryptoError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e)              => write!(f, "{e}"),
            Self::Service(e)            => write!(f, "{e}"),
            Self::Application { message, code } => {
                write!(f, "application exception {code}: {message}")
            }
            Self::UnexpectedReply(what) => write!(f, "unexpected reply: {what}"),
            Self::Crypto(e)             => write!(f, "crypto error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e)   => Some(e),
            Self::Service(e) => Some(e),
            Self::Crypto(e)  => Some(e),
            _ => None,
        }
    }
}

impl From<legy_thrift::Error> for Error {
    fn from(e: legy_thrift::Error) -> Self { Self::Codec(e) }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self { Self::Crypto(e) }
}

/// Specialized `Result` for the protocol layer.
pub type Result<T> = std::result::Result<T, Error>;

//! The session credential and its opaque export format.

use chrono::{DateTime, TimeZone, Utc};
use legy_thrift::{Protocol, Struct, TypedValue, decode, encode};

use crate::error::{Error, Result};
use crate::schema::token_info;

/// First byte of every exported credential.
const EXPORT_VERSION: u8 = 1;

mod field {
    pub const TOKEN: i16 = 1;
    pub const REFRESH_TOKEN: i16 = 2;
    pub const ACCOUNT_ID: i16 = 3;
    pub const CERTIFICATE: i16 = 4;
    pub const VALID: i16 = 5;
    pub const ISSUED_AT_MS: i16 = 6;
    pub const LIFETIME_SECS: i16 = 7;
}

/// An access token plus what is known about its validity.
///
/// `Debug` never prints the token, refresh token or certificate.
#[derive(Clone, PartialEq)]
pub struct Credential {
    token:         String,
    refresh_token: Option<String>,
    account_id:    Option<String>,
    certificate:   Option<String>,
    valid:         bool,
    issued_at:     DateTime<Utc>,
    lifetime_secs: Option<i64>,
}

impl Credential {
    /// A valid credential issued now.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token:         token.into(),
            refresh_token: None,
            account_id:    None,
            certificate:   None,
            valid:         true,
            issued_at:     Utc::now(),
            lifetime_secs: None,
        }
    }

    pub fn with_refresh_token(mut self, t: impl Into<String>) -> Self {
        self.refresh_token = Some(t.into());
        self
    }

    pub fn with_account_id(mut self, id: impl Into<String>) -> Self {
        self.account_id = Some(id.into());
        self
    }

    pub fn with_certificate(mut self, cert: impl Into<String>) -> Self {
        self.certificate = Some(cert.into());
        self
    }

    pub fn with_lifetime_secs(mut self, secs: i64) -> Self {
        self.lifetime_secs = Some(secs);
        self
    }

    /// Build from an issued token bundle.
    pub fn from_token_info(info: &Struct) -> Result<Self> {
        let token = info.get_str(token_info::ACCESS_TOKEN)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::UnexpectedReply("token info without access token".into()))?;
        let mut cred = Self::new(token);
        cred.refresh_token = info.get_str(token_info::REFRESH_TOKEN).map(str::to_string);
        cred.lifetime_secs = info.get_i64(token_info::DURATION_SECS);
        Ok(cred)
    }

    pub fn token(&self) -> &str { &self.token }
    pub fn refresh_token(&self) -> Option<&str> { self.refresh_token.as_deref() }
    pub fn account_id(&self) -> Option<&str> { self.account_id.as_deref() }
    pub fn certificate(&self) -> Option<&str> { self.certificate.as_deref() }
    pub fn is_valid(&self) -> bool { self.valid }
    pub fn issued_at(&self) -> DateTime<Utc> { self.issued_at }

    /// When the service suggested refreshing, if it said.
    pub fn refresh_due(&self) -> Option<DateTime<Utc>> {
        self.lifetime_secs
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| self.issued_at.checked_add_signed(d))
    }

    /// A copy marked invalid.
    pub fn invalidated(&self) -> Self {
        Self { valid: false, ..self.clone() }
    }

    /// Serialize to opaque bytes for an external store.
    pub fn export(&self) -> Result<Vec<u8>> {
        let mut s = Struct::new()
            .with(field::TOKEN, self.token.as_str())
            .with(field::VALID, self.valid)
            .with(field::ISSUED_AT_MS, self.issued_at.timestamp_millis());
        if let Some(t) = &self.refresh_token { s.set(field::REFRESH_TOKEN, t.as_str()); }
        if let Some(a) = &self.account_id { s.set(field::ACCOUNT_ID, a.as_str()); }
        if let Some(c) = &self.certificate { s.set(field::CERTIFICATE, c.as_str()); }
        if let Some(l) = self.lifetime_secs { s.set(field::LIFETIME_SECS, l); }

        let mut out = vec![EXPORT_VERSION];
        out.extend(encode(&TypedValue::Struct(s), Protocol::Compact)?);
        Ok(out)
    }

    /// Inverse of [`Credential::export`].
    pub fn import(bytes: &[u8]) -> Result<Self> {
        let (&version, body) = bytes.split_first()
            .ok_or_else(|| Error::UnexpectedReply("empty credential blob".into()))?;
        if version != EXPORT_VERSION {
            return Err(Error::UnexpectedReply(format!("credential format version {version}")));
        }
        let s = match decode(body, Protocol::Compact)? {
            TypedValue::Struct(s) => s,
            _ => return Err(Error::UnexpectedReply("credential blob is not a struct".into())),
        };
        let token = s.get_str(field::TOKEN)
            .ok_or_else(|| Error::UnexpectedReply("credential blob without token".into()))?;
        let issued_at = s.get_i64(field::ISSUED_AT_MS)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        Ok(Self {
            token:         token.to_string(),
            refresh_token: s.get_str(field::REFRESH_TOKEN).map(str::to_string),
            account_id:    s.get_str(field::ACCOUNT_ID).map(str::to_string),
            certificate:   s.get_str(field::CERTIFICATE).map(str::to_string),
            valid:         s.get_bool(field::VALID).unwrap_or(true),
            issued_at,
            lifetime_secs: s.get_i64(field::LIFETIME_SECS),
        })
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("valid", &self.valid)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

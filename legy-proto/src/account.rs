//! Token-bound account calls: validation, refresh and logout.

use legy_thrift::Struct;

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::schema::{self, method, profile, refresh_response};
use crate::session::Call;

/// The parts of a profile needed to confirm a token works.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub account_id:   String,
    pub display_name: String,
}

impl Profile {
    pub fn from_struct(s: &Struct) -> Result<Self> {
        let account_id = s.get_str(profile::ACCOUNT_ID)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::UnexpectedReply("profile without account id".into()))?;
        Ok(Self {
            account_id:   account_id.to_string(),
            display_name: s.get_str(profile::DISPLAY_NAME).unwrap_or_default().to_string(),
        })
    }
}

/// `getProfile`; any authenticated call would do, this one is cheap.
pub fn get_profile() -> Call {
    Call::new(method::GET_PROFILE, Struct::new())
}

/// Exchange a refresh token for a new access token.
pub fn refresh(refresh_token: &str) -> Call {
    let req = Struct::new().with(1, refresh_token);
    Call::new(method::REFRESH, Struct::new().with(schema::REQUEST, req))
}

/// Build the successor of `previous` from a refresh reply.
///
/// The account id and certificate carry over. The refresh token carries
/// over unless the reply rotates it.
pub fn read_refresh(previous: &Credential, reply: &Struct) -> Result<Credential> {
    let token = reply.get_str(refresh_response::ACCESS_TOKEN)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::UnexpectedReply("refresh reply without access token".into()))?;

    let mut next = Credential::new(token);
    if let Some(r) = reply.get_str(refresh_response::REFRESH_TOKEN).or(previous.refresh_token()) {
        next = next.with_refresh_token(r);
    }
    if let Some(id) = previous.account_id() {
        next = next.with_account_id(id);
    }
    if let Some(cert) = previous.certificate() {
        next = next.with_certificate(cert);
    }
    if let Some(secs) = reply.get_i64(refresh_response::DURATION_SECS) {
        next = next.with_lifetime_secs(secs);
    }
    Ok(next)
}

/// Revoke the current access token server-side.
pub fn logout() -> Call {
    Call::new(method::LOGOUT, Struct::new().with(schema::REQUEST, Struct::new()))
}

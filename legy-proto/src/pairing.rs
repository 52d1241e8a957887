//! Sans-IO device pairing.
//!
//! # Flow
//!
//! ```text
//! let (call, s1) = pairing::step1()?;
//! // send call, receive reply
//! let (call, s2) = pairing::step2(s1, &reply)?;
//! // send call, receive reply
//! let (challenge, pending) = pairing::step3(s2, &reply)?;
//! // show challenge.url to the user, then repeatedly:
//! //   send pending.status_call(), feed the outcome to ApprovalStatus::from_reply
//! // once scanned, either present a certificate from an earlier pairing:
//! //   send pending.verify_certificate_call(cert)
//! // or, if there is none or it is refused, fall back to a PIN:
//! //   send pending.pin_call(), show pending.read_pin(&reply)?, then poll
//! //   pending.pin_status_call() the same way as the status call
//! let (call, kx) = pending.approve(system_name, model_name);
//! // send call, receive reply
//! let credential = pairing::finish(kx, &reply)?;
//! ```
//!
//! The approving device answers the login call with its own X25519 public
//! key and the token bundle sealed under `SHA-256(X25519(ours, theirs))`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use legy_crypto::PairingKeyPair;
use legy_thrift::{Protocol, Struct, TypedValue, decode};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::schema::{self, method, pairing};
use crate::session::Call;

/// Key-exchange scheme version advertised in the challenge URL.
const E2EE_VERSION: u32 = 1;

/// What the caller shows the user.
#[derive(Clone, Debug, PartialEq)]
pub struct PairingChallenge {
    /// URL to render as a scannable code.
    pub url:        String,
    /// Pairing session id; also sent as the access header on long polls.
    pub session_id: String,
    /// Our raw X25519 public key, as embedded in `url`.
    pub public_key: [u8; 32],
}

/// Outcome of one approval status check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    /// Interpret the outcome of a status-check call.
    ///
    /// A plain success means approved unless the reply spells out a status.
    /// Service exceptions with known pairing codes map to a status; anything
    /// else is returned as an error.
    pub fn from_reply(reply: Result<Struct>) -> Result<Self> {
        match reply {
            Ok(body) => Ok(match body.get_i32(pairing::STATUS) {
                None | Some(pairing::status::APPROVED) => Self::Approved,
                Some(pairing::status::PENDING) => Self::Pending,
                Some(pairing::status::DENIED)  => Self::Denied,
                Some(pairing::status::EXPIRED) => Self::Expired,
                Some(other) => {
                    return Err(Error::UnexpectedReply(format!("pairing status {other}")));
                }
            }),
            Err(Error::Service(e)) => match e.code {
                pairing::error::RETRY_LATER => Ok(Self::Pending),
                pairing::error::VERIFICATION_FAILED => Ok(Self::Denied),
                pairing::error::NOT_FOUND | pairing::error::INVALID_CONTEXT => Ok(Self::Expired),
                _ => Err(Error::Service(e)),
            },
            Err(e) => Err(e),
        }
    }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// State after step 1.
pub struct Step1 { keys: PairingKeyPair }

/// State after step 2.
pub struct Step2 {
    keys:       PairingKeyPair,
    session_id: String,
}

/// A challenge waiting for out-of-band approval.
#[derive(Debug)]
pub struct Challenge {
    keys:       PairingKeyPair,
    session_id: String,
}

/// An approved challenge waiting for the login reply.
#[derive(Debug)]
pub struct KeyExchange {
    keys:       PairingKeyPair,
    session_id: String,
}

fn request(inner: Struct) -> Struct {
    Struct::new().with(schema::REQUEST, inner)
}

fn session_request(session_id: &str) -> Struct {
    request(Struct::new().with(pairing::SESSION_ID, session_id))
}

// ─── Step 1: createSession ───────────────────────────────────────────────────

/// Generate the key pair and the `createSession` call.
pub fn step1() -> Result<(Call, Step1)> {
    let keys = PairingKeyPair::generate()?;
    Ok(do_step1(keys))
}

fn do_step1(keys: PairingKeyPair) -> (Call, Step1) {
    (Call::new(method::CREATE_SESSION, request(Struct::new())), Step1 { keys })
}

/// Like [`step1`] with a caller-supplied key pair.
pub fn step1_with_keys(keys: PairingKeyPair) -> (Call, Step1) {
    do_step1(keys)
}

// ─── Step 2: createQrCode ────────────────────────────────────────────────────

/// Read the pairing session id and ask for a challenge code.
pub fn step2(data: Step1, reply: &Struct) -> Result<(Call, Step2)> {
    let session_id = reply.get_str(pairing::SESSION_ID)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::UnexpectedReply("createSession reply without session id".into()))?
        .to_string();
    log::debug!("[legy] pairing session created");
    let call = Call::new(method::CREATE_QR_CODE, session_request(&session_id));
    Ok((call, Step2 { keys: data.keys, session_id }))
}

// ─── Step 3: challenge ───────────────────────────────────────────────────────

/// Build the user-facing challenge from the `createQrCode` reply.
pub fn step3(data: Step2, reply: &Struct) -> Result<(PairingChallenge, Challenge)> {
    let Step2 { keys, session_id } = data;
    let base = reply.get_str(pairing::CALLBACK_URL)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::UnexpectedReply("createQrCode reply without url".into()))?;

    let public_key = keys.public_bytes();
    let secret = STANDARD.encode(public_key);
    let sep = if base.contains('?') { '&' } else { '?' };
    let url = format!(
        "{base}{sep}secret={}&e2eeVersion={E2EE_VERSION}",
        urlencoding::encode(&secret)
    );

    let challenge = PairingChallenge { url, session_id: session_id.clone(), public_key };
    Ok((challenge, Challenge { keys, session_id }))
}

impl Challenge {
    pub fn session_id(&self) -> &str { &self.session_id }

    /// The long-poll status check.
    pub fn status_call(&self) -> Call {
        Call::new(method::CHECK_QR_CODE_VERIFIED, session_request(&self.session_id))
    }

    /// Interpret the outcome of [`Challenge::status_call`].
    pub fn read_status(&self, reply: Result<Struct>) -> Result<ApprovalStatus> {
        let status = ApprovalStatus::from_reply(reply)?;
        log::debug!("[legy] pairing status: {status:?}");
        Ok(status)
    }

    /// Present the certificate a previous pairing returned. Success means
    /// the approving device trusts us and no PIN is needed.
    pub fn verify_certificate_call(&self, certificate: &str) -> Call {
        use pairing::verify;
        let args = request(
            Struct::new()
                .with(verify::SESSION_ID, self.session_id.as_str())
                .with(verify::CERTIFICATE, certificate),
        );
        Call::new(method::VERIFY_CERTIFICATE, args)
    }

    /// Ask for a PIN to show the user.
    pub fn pin_call(&self) -> Call {
        Call::new(method::CREATE_PIN_CODE, session_request(&self.session_id))
    }

    /// The PIN from a [`Challenge::pin_call`] reply.
    pub fn read_pin(&self, reply: &Struct) -> Result<String> {
        reply.get_str(pairing::PIN_CODE)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::UnexpectedReply("createPinCode reply without pin".into()))
    }

    /// The long-poll check that the PIN was entered. Its outcome reads like
    /// [`Challenge::status_call`]'s.
    pub fn pin_status_call(&self) -> Call {
        Call::new(method::CHECK_PIN_CODE_VERIFIED, session_request(&self.session_id))
    }

    /// Consume the challenge once approved and build the login call.
    pub fn approve(self, system_name: &str, model_name: &str) -> (Call, KeyExchange) {
        use pairing::login;
        let args = request(
            Struct::new()
                .with(login::SESSION_ID, self.session_id.as_str())
                .with(login::SYSTEM_NAME, system_name)
                .with(login::MODEL_NAME, model_name)
                .with(login::AUTO_LOGIN, true),
        );
        let kx = KeyExchange { keys: self.keys, session_id: self.session_id };
        (Call::new(method::QR_CODE_LOGIN_V2, args), kx)
    }
}

impl KeyExchange {
    pub fn session_id(&self) -> &str { &self.session_id }
}

// ─── Finish: key exchange ────────────────────────────────────────────────────

/// Derive the shared key from the login reply and open the sealed token.
pub fn finish(data: KeyExchange, reply: &Struct) -> Result<Credential> {
    use pairing::login_response as f;

    let peer = reply.get_bytes(f::PEER_PUBLIC_KEY)
        .ok_or_else(|| Error::UnexpectedReply("login reply without peer public key".into()))?;
    let sealed = reply.get_bytes(f::SEALED_TOKEN_INFO)
        .ok_or_else(|| Error::UnexpectedReply("login reply without sealed token".into()))?;

    let key = data.keys.agree(peer)?;
    let plain = key.open(sealed)?;
    let info = match decode(&plain, Protocol::Compact)? {
        TypedValue::Struct(s) => s,
        _ => return Err(Error::UnexpectedReply("sealed token is not a struct".into())),
    };

    let mut cred = Credential::from_token_info(&info)?;
    if let Some(cert) = reply.get_str(f::CERTIFICATE) {
        cred = cred.with_certificate(cert);
    }
    if let Some(id) = reply.get_str(f::ACCOUNT_ID) {
        cred = cred.with_account_id(id);
    }
    log::info!("[legy] pairing key exchange complete");
    Ok(cred)
}

//! Authentication state machine and the shared credential.
//!
//! ```text
//! Unauthenticated ──start_pairing──▶ Challenging ──poll_approval──▶ KeyExchanging
//!        ▲    │                       ▲     │  (denied / expired)           │
//!        │    │         (PIN required)└─────┤                           derive_secret
//!        │    │                             ▼                               │
//!        │    └──login_with_token──▶ Authenticated ◀────────────────────────┘
//!        └────────invalidate / logout ────┘
//! ```
//!
//! The current [`SessionState`] lives in a `tokio::sync::watch` channel.
//! Every transition replaces the whole value, so readers always see a phase
//! and credential that belong together.
//!
//! Once the challenge is scanned the manager presents the certificate of an
//! earlier pairing, if it has one. Without one, or if the service refuses
//! it, the approving device must also confirm a PIN.

use std::fmt;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use legy_proto::pairing::{self, Challenge, KeyExchange};
use legy_proto::{ApprovalStatus, Call, Credential, PairingChallenge, Profile, account};
use legy_thrift::{Struct, TypedValue};
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, sleep, timeout};

use crate::channel::{Access, Channel, Service};
use crate::errors::{AuthError, InvocationError};
use crate::retry::{RetryContext, RetryPolicy};
use crate::{Config, DeviceIdentity};

/// Pause between status checks when the service answers "pending" at once.
const APPROVAL_RECHECK: Duration = Duration::from_secs(1);

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthState {
    Unauthenticated,
    Challenging,
    KeyExchanging,
    Authenticated,
}

/// A consistent snapshot of the session.
///
/// After invalidation the last credential is kept, marked invalid, so it
/// can still be refreshed or inspected.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub phase:      AuthState,
    pub credential: Option<Arc<Credential>>,
}

impl SessionState {
    pub fn unauthenticated() -> Self {
        Self { phase: AuthState::Unauthenticated, credential: None }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthState::Authenticated
    }
}

/// What a call to [`SessionManager::poll_approval`] achieved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Approval {
    /// Approved. The session is `KeyExchanging`.
    Granted,
    /// The approving device must enter this PIN. Show it, then call
    /// `poll_approval` again. The session stays `Challenging`.
    PinRequired(String),
}

/// Something [`SessionManager::login_with_pairing`] needs the user to see.
#[derive(Clone, Copy, Debug)]
pub enum PairingPrompt<'a> {
    /// Render `url` as a scannable code.
    Challenge(&'a PairingChallenge),
    /// Enter this PIN on the approving device.
    Pin(&'a str),
}

impl fmt::Display for PairingPrompt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Challenge(c) => write!(f, "scan {}", c.url),
            Self::Pin(pin)     => write!(f, "enter PIN {pin}"),
        }
    }
}

enum Pending {
    Nothing,
    Challenge(Challenge),
    Pin(Challenge),
    KeyExchange(KeyExchange, Struct),
}

/// Which confirmation a challenge is waiting for.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Scan,
    Pin,
}

// ─── SessionManager ───────────────────────────────────────────────────────────

/// Owns the authentication state and routes every call so an auth failure
/// anywhere invalidates the session for everyone.
pub struct SessionManager {
    channel:         Arc<Channel>,
    state:           watch::Sender<SessionState>,
    pending:         Mutex<Pending>,
    certificate:     RwLock<Option<String>>,
    device:          DeviceIdentity,
    pairing_timeout: Duration,
    auth_codes:      Vec<i32>,
    auth_statuses:   Vec<u16>,
    retry_policy:    Arc<dyn RetryPolicy>,
}

impl SessionManager {
    pub fn new(channel: Arc<Channel>, state: watch::Sender<SessionState>, config: &Config) -> Self {
        Self {
            channel,
            state,
            pending:         Mutex::new(Pending::Nothing),
            certificate:     RwLock::new(config.pairing_certificate.clone()),
            device:          config.device.clone(),
            pairing_timeout: config.pairing_timeout,
            auth_codes:      config.auth_failure_codes.clone(),
            auth_statuses:   config.auth_failure_statuses.clone(),
            retry_policy:    config.retry_policy.clone(),
        }
    }

    // ── Observation ────────────────────────────────────────────────────────

    pub fn state(&self) -> AuthState {
        self.state.borrow().phase
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// The current credential, valid or not.
    pub fn credential(&self) -> Option<Arc<Credential>> {
        self.state.borrow().credential.clone()
    }

    /// Watch every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn is_auth_failure(&self, e: &InvocationError) -> bool {
        e.is_auth_failure(&self.auth_codes, &self.auth_statuses)
    }

    /// The certificate the next pairing presents, from the configuration or
    /// the last credential that carried one.
    pub fn pairing_certificate(&self) -> Option<String> {
        self.certificate.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_phase(&self, phase: AuthState) {
        self.state.send_if_modified(|s| {
            let changed = s.phase != phase;
            s.phase = phase;
            changed
        });
    }

    fn install(&self, cred: Credential) -> Arc<Credential> {
        if let Some(cert) = cred.certificate() {
            *self.certificate.write().unwrap_or_else(PoisonError::into_inner) = Some(cert.to_string());
        }
        let cred = Arc::new(cred);
        self.state.send_replace(SessionState {
            phase:      AuthState::Authenticated,
            credential: Some(cred.clone()),
        });
        log::info!("[legy] authenticated (account {:?})", cred.account_id());
        cred
    }

    /// Abandon pairing. Nothing from an earlier session survives it.
    async fn reset_pairing(&self) {
        *self.pending.lock().await = Pending::Nothing;
        self.state.send_replace(SessionState::unauthenticated());
    }

    async fn park(&self, challenge: Challenge, stage: Stage) {
        *self.pending.lock().await = match stage {
            Stage::Scan => Pending::Challenge(challenge),
            Stage::Pin  => Pending::Pin(challenge),
        };
    }

    // ── Pairing ────────────────────────────────────────────────────────────

    /// Ask the service for a challenge and return it without waiting for
    /// approval. Starting again while a challenge is pending replaces it.
    ///
    /// A leftover invalid credential is dropped once the challenge is issued.
    pub async fn start_pairing(&self) -> Result<PairingChallenge, AuthError> {
        if self.state() == AuthState::Authenticated {
            return Err(AuthError::AlreadyAuthenticated);
        }
        *self.pending.lock().await = Pending::Nothing;

        let (call, s1) = pairing::step1()
            .map_err(|e| AuthError::KeyExchangeFailed(e.to_string()))?;
        let reply = self.channel.call_struct(Service::Pairing, call, Access::Anonymous).await?;
        let (call, s2) = pairing::step2(s1, &reply).map_err(InvocationError::from)?;
        let reply = self.channel.call_struct(Service::Pairing, call, Access::Anonymous).await?;
        let (challenge, pending) = pairing::step3(s2, &reply).map_err(InvocationError::from)?;

        *self.pending.lock().await = Pending::Challenge(pending);
        self.state.send_replace(SessionState { phase: AuthState::Challenging, credential: None });
        log::info!("[legy] pairing challenge issued");
        Ok(challenge)
    }

    /// Wait until the challenge is answered, at most the pairing timeout.
    ///
    /// Once the code is scanned the stored certificate is presented. If
    /// there is none, or it is refused, a PIN is requested and returned as
    /// [`Approval::PinRequired`]; call again to wait for the PIN to be
    /// entered. On approval the login call is made and the session moves to
    /// `KeyExchanging`.
    ///
    /// A transport failure leaves the challenge pending so the caller may
    /// try again.
    pub async fn poll_approval(&self) -> Result<Approval, AuthError> {
        let taken = std::mem::replace(&mut *self.pending.lock().await, Pending::Nothing);
        let (challenge, stage) = match taken {
            Pending::Challenge(c) => (c, Stage::Scan),
            Pending::Pin(c)       => (c, Stage::Pin),
            other => {
                *self.pending.lock().await = other;
                return Err(AuthError::InvalidState {
                    expected: AuthState::Challenging,
                    actual:   self.state(),
                });
            }
        };

        let challenge = self.await_confirmation(challenge, stage).await?;
        if stage == Stage::Scan && !self.certificate_accepted(&challenge).await {
            return self.request_pin(challenge).await;
        }

        log::info!("[legy] pairing approved");
        let (call, kx) = challenge.approve(self.device.system_name(), &self.device.device_id);
        match self.channel.call_struct(Service::Pairing, call, Access::Anonymous).await {
            Ok(reply) => {
                *self.pending.lock().await = Pending::KeyExchange(kx, reply);
                self.set_phase(AuthState::KeyExchanging);
                Ok(Approval::Granted)
            }
            Err(e) => {
                // the challenge is spent
                self.reset_pairing().await;
                Err(e.into())
            }
        }
    }

    /// Long-poll the scan or PIN check until it is approved.
    async fn await_confirmation(&self, challenge: Challenge, stage: Stage) -> Result<Challenge, AuthError> {
        let deadline = Instant::now() + self.pairing_timeout;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                log::info!("[legy] pairing approval timed out");
                self.reset_pairing().await;
                return Err(AuthError::PairingExpired);
            };

            let access = Access::Token(challenge.session_id().to_string());
            let call = match stage {
                Stage::Scan => challenge.status_call(),
                Stage::Pin  => challenge.pin_status_call(),
            };
            let outcome = match timeout(remaining, self.channel.call_struct(Service::PairingPoll, call, access)).await {
                Err(_) => continue,
                Ok(Err(e)) if e.is_timeout() => continue,
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(InvocationError::Service(e))) => Err(legy_proto::Error::Service(e)),
                Ok(Err(e)) => {
                    self.park(challenge, stage).await;
                    return Err(e.into());
                }
            };

            match challenge.read_status(outcome).map_err(InvocationError::from) {
                Ok(ApprovalStatus::Pending) => sleep(APPROVAL_RECHECK.min(remaining)).await,
                Ok(ApprovalStatus::Approved) => return Ok(challenge),
                Ok(ApprovalStatus::Denied) => {
                    self.reset_pairing().await;
                    return Err(AuthError::PairingRejected);
                }
                Ok(ApprovalStatus::Expired) => {
                    self.reset_pairing().await;
                    return Err(AuthError::PairingExpired);
                }
                Err(e) => {
                    self.reset_pairing().await;
                    return Err(e.into());
                }
            }
        }
    }

    async fn certificate_accepted(&self, challenge: &Challenge) -> bool {
        let Some(cert) = self.pairing_certificate() else {
            return false;
        };
        let call = challenge.verify_certificate_call(&cert);
        match self.channel.call(Service::Pairing, call, Access::Anonymous).await {
            Ok(_) => {
                log::debug!("[legy] pairing certificate accepted");
                true
            }
            Err(e) => {
                log::info!("[legy] pairing certificate refused, falling back to PIN: {e}");
                false
            }
        }
    }

    async fn request_pin(&self, challenge: Challenge) -> Result<Approval, AuthError> {
        let pin = match self.channel.call_struct(Service::Pairing, challenge.pin_call(), Access::Anonymous).await {
            Ok(reply) => challenge.read_pin(&reply).map_err(InvocationError::from),
            Err(e) => Err(e),
        };
        match pin {
            Ok(pin) => {
                log::info!("[legy] pairing needs PIN confirmation");
                self.park(challenge, Stage::Pin).await;
                Ok(Approval::PinRequired(pin))
            }
            Err(e) => {
                self.reset_pairing().await;
                Err(e.into())
            }
        }
    }

    /// Open the sealed token from the approval reply and authenticate.
    pub async fn derive_secret(&self) -> Result<Arc<Credential>, AuthError> {
        let taken = std::mem::replace(&mut *self.pending.lock().await, Pending::Nothing);
        let (kx, reply) = match taken {
            Pending::KeyExchange(kx, reply) => (kx, reply),
            other => {
                *self.pending.lock().await = other;
                return Err(AuthError::InvalidState {
                    expected: AuthState::KeyExchanging,
                    actual:   self.state(),
                });
            }
        };
        match pairing::finish(kx, &reply) {
            Ok(cred) => Ok(self.install(cred)),
            Err(e) => {
                log::warn!("[legy] key exchange failed: {e}");
                self.reset_pairing().await;
                Err(AuthError::KeyExchangeFailed(e.to_string()))
            }
        }
    }

    /// Start pairing, hand each prompt to `show`, wait for approval and
    /// derive the credential.
    pub async fn login_with_pairing<F>(&self, mut show: F) -> Result<Arc<Credential>, AuthError>
    where
        F: FnMut(PairingPrompt<'_>),
    {
        let challenge = self.start_pairing().await?;
        show(PairingPrompt::Challenge(&challenge));
        while let Approval::PinRequired(pin) = self.poll_approval().await? {
            show(PairingPrompt::Pin(&pin));
        }
        self.derive_secret().await
    }

    // ── Tokens ─────────────────────────────────────────────────────────────

    /// Authenticate with a previously issued access token.
    pub async fn login_with_token(&self, token: impl Into<String>) -> Result<Arc<Credential>, AuthError> {
        if self.state() == AuthState::Authenticated {
            return Err(AuthError::AlreadyAuthenticated);
        }
        self.validate(Credential::new(token)).await
    }

    async fn validate(&self, cred: Credential) -> Result<Arc<Credential>, AuthError> {
        let access = Access::Token(cred.token().to_string());
        match self.channel.call_struct(Service::Talk, account::get_profile(), access).await {
            Ok(reply) => {
                let profile = Profile::from_struct(&reply).map_err(InvocationError::from)?;
                let cred = if cred.account_id().is_some() { cred } else { cred.with_account_id(profile.account_id) };
                Ok(self.install(cred))
            }
            Err(e) if self.is_auth_failure(&e) || matches!(e, InvocationError::Service(_)) => {
                log::info!("[legy] token rejected: {e}");
                Err(AuthError::InvalidCredential)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Refused for primary device types: refreshing there would end the
    /// session on the phone the account lives on.
    pub async fn refresh(&self) -> Result<Arc<Credential>, AuthError> {
        let device_type = self.device.device_type;
        if device_type.is_primary() {
            log::warn!("[legy] token refresh is disabled for primary device {device_type}");
            return Err(AuthError::PrimaryDevice(device_type));
        }
        let Some(current) = self.credential() else {
            return Err(AuthError::InvalidState {
                expected: AuthState::Authenticated,
                actual:   self.state(),
            });
        };
        let Some(refresh_token) = current.refresh_token() else {
            return Err(AuthError::InvalidCredential);
        };
        let call = account::refresh(refresh_token);
        match self.channel.call_struct(Service::Refresh, call, Access::Anonymous).await {
            Ok(reply) => {
                let next = account::read_refresh(&current, &reply).map_err(InvocationError::from)?;
                log::info!("[legy] access token refreshed");
                Ok(self.install(next))
            }
            Err(e) if self.is_auth_failure(&e) || matches!(e, InvocationError::Service(_)) => {
                self.invalidate_if_current(Some(&current));
                Err(AuthError::InvalidCredential)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh if the credential says it is due. Returns whether it did.
    ///
    /// Never refreshes on a primary device type.
    pub async fn refresh_if_due(&self) -> Result<bool, AuthError> {
        if self.device.device_type.is_primary() {
            return Ok(false);
        }
        let due = self.credential()
            .filter(|c| c.refresh_token().is_some())
            .and_then(|c| c.refresh_due())
            .is_some_and(|at| at <= Utc::now());
        if due {
            self.refresh().await?;
        }
        Ok(due)
    }

    /// Revoke the token server-side, then drop it locally.
    ///
    /// The local credential is dropped even if the call fails.
    pub async fn logout(&self) -> Result<(), AuthError> {
        if self.state() != AuthState::Authenticated {
            return Err(AuthError::InvalidState {
                expected: AuthState::Authenticated,
                actual:   self.state(),
            });
        }
        let result = self.channel.call(Service::Talk, account::logout(), Access::Current).await;
        self.state.send_replace(SessionState::unauthenticated());
        log::info!("[legy] logged out");
        match result {
            Ok(_) => Ok(()),
            Err(e) if self.is_auth_failure(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop to `Unauthenticated` and tell every subscriber.
    ///
    /// The credential is kept, marked invalid.
    pub fn invalidate(&self) {
        self.invalidate_where(|_| true);
    }

    /// Like [`SessionManager::invalidate`], but only while `used` is still
    /// the current credential. A late rejection of a token that has since
    /// been replaced changes nothing, and neither does the rejection of a
    /// request that carried no credential.
    pub fn invalidate_if_current(&self, used: Option<&Arc<Credential>>) {
        self.invalidate_where(|current| match (used, current) {
            (Some(used), Some(current)) => Arc::ptr_eq(used, current),
            _ => false,
        });
    }

    fn invalidate_where(&self, applies: impl FnOnce(Option<&Arc<Credential>>) -> bool) {
        let changed = self.state.send_if_modified(|s| {
            if !applies(s.credential.as_ref()) {
                return false;
            }
            if s.phase == AuthState::Unauthenticated && s.credential.as_ref().is_none_or(|c| !c.is_valid()) {
                return false;
            }
            s.phase = AuthState::Unauthenticated;
            s.credential = s.credential.as_ref().map(|c| Arc::new(c.invalidated()));
            true
        });
        if changed {
            log::warn!("[legy] session invalidated");
        }
    }

    // ── Persistence ────────────────────────────────────────────────────────

    /// Opaque bytes for the current credential, if any.
    pub fn export_credential(&self) -> Result<Option<Vec<u8>>, AuthError> {
        match self.credential() {
            Some(c) => Ok(Some(c.export().map_err(InvocationError::from)?)),
            None => Ok(None),
        }
    }

    /// Restore a credential from [`SessionManager::export_credential`] bytes.
    ///
    /// A valid credential is checked with the service before it is used.
    /// An invalid one is refreshed if it carries a refresh token.
    pub async fn import_credential(&self, bytes: &[u8]) -> Result<Arc<Credential>, AuthError> {
        if self.state() == AuthState::Authenticated {
            return Err(AuthError::AlreadyAuthenticated);
        }
        let cred = Credential::import(bytes).map_err(|e| {
            log::warn!("[legy] stored credential unreadable: {e}");
            AuthError::InvalidCredential
        })?;
        if cred.is_valid() {
            return self.validate(cred).await;
        }
        if cred.refresh_token().is_none() {
            return Err(AuthError::InvalidCredential);
        }
        self.state.send_replace(SessionState {
            phase:      AuthState::Unauthenticated,
            credential: Some(Arc::new(cred)),
        });
        self.refresh().await
    }

    // ── Calls ──────────────────────────────────────────────────────────────

    /// One attempt, no retries.
    ///
    /// The call carries the current credential if it is valid. An auth
    /// failure invalidates that credential, unless it was replaced while
    /// the call was in flight.
    pub async fn invoke_once(&self, service: Service, call: Call) -> Result<Option<TypedValue>, InvocationError> {
        let used = self.credential().filter(|c| c.is_valid());
        let access = match &used {
            Some(c) => Access::Token(c.token().to_string()),
            None    => Access::Anonymous,
        };
        let result = self.channel.call(service, call, access).await;
        if let Err(e) = &result {
            if self.is_auth_failure(e) {
                self.invalidate_if_current(used.as_ref());
            }
        }
        result
    }

    /// Send an authenticated call, retrying per the configured policy.
    pub async fn invoke(&self, service: Service, call: Call) -> Result<Option<TypedValue>, InvocationError> {
        let mut fail_count   = NonZeroU32::MIN;
        let mut slept_so_far = Duration::default();
        loop {
            match self.invoke_once(service, call.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if self.is_auth_failure(&e) => return Err(e),
                Err(e) => {
                    let ctx = RetryContext { fail_count, slept_so_far, error: e };
                    match self.retry_policy.should_retry(&ctx) {
                        ControlFlow::Continue(delay) => {
                            sleep(delay).await;
                            slept_so_far += delay;
                            fail_count = fail_count.saturating_add(1);
                        }
                        ControlFlow::Break(()) => return Err(ctx.error),
                    }
                }
            }
        }
    }
}

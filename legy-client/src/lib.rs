//! # legy-client
//!
//! Async client for the legy messaging service, for automating a single
//! account you own.
//!
//! ## Features
//! - QR pairing login with X25519 key agreement and certificate or PIN
//!   confirmation, or login with a saved token
//! - Session state published on a `watch` channel; an auth failure from any
//!   call invalidates the session for every component at once
//! - Token refresh and logout
//! - Long-poll event dispatcher with per-kind handlers, capped exponential
//!   backoff, suspension on invalidation and cooperative cancellation
//! - HTTP/2 transport with gzip and optional proxy, replaceable through
//!   the [`Transport`] trait
//! - Credential persistence through a pluggable [`CredentialStore`]
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use legy_client::{Client, Config, EventFilter, OpKind};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(Config::default());
//! if client.restore().await?.is_none() {
//!     client.session()
//!         .login_with_pairing(|prompt| println!("{prompt}"))
//!         .await?;
//!     client.persist()?;
//! }
//!
//! let dispatcher = client.dispatcher();
//! dispatcher.on(OpKind::ReceiveMessage, |event| {
//!     println!("{:?}", event.text());
//!     Ok(())
//! });
//! dispatcher.on(EventFilter::Any, |event| {
//!     println!("rev {} {:?}", event.revision(), event.kind());
//!     Ok(())
//! });
//!
//! let mut handle = dispatcher.spawn(CancellationToken::new());
//! while let Some(notice) = handle.next_notice().await {
//!     eprintln!("{notice:?}");
//! }
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

mod channel;
mod device;
mod dispatcher;
mod errors;
mod retry;
mod session;
pub mod session_backend;
pub mod transport;
pub mod update;

pub use channel::{Access, Channel, Endpoint, Endpoints, HeaderNames, Service};
pub use device::{DeviceIdentity, DeviceType};
pub use dispatcher::{Dispatcher, DispatcherHandle, HandlerId, Notice};
pub use errors::{AuthError, HandlerError, InvocationError, TransportError, TransportErrorKind};
pub use retry::{Backoff, NoRetries, RetryContext, RetryPolicy};
pub use session::{Approval, AuthState, PairingPrompt, SessionManager, SessionState};
pub use session_backend::{CredentialStore, FileStore, InMemoryStore};
pub use transport::{HttpRequest, HttpTransport, Transport};
pub use update::{Event, EventFilter};

pub use legy_proto::{
    ApprovalStatus, Call, Credential, Message, OpKind, Operation, PairingChallenge, PollCursor,
    Profile, ReplyTarget, ServiceException, ToType,
};

use std::sync::Arc;
use std::time::Duration;

use legy_proto::account;
use legy_thrift::TypedValue;
use tokio::sync::watch;

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Client::new`].
///
/// Override fields with struct update syntax:
///
/// ```rust
/// use legy_client::{Config, DeviceIdentity, DeviceType};
///
/// let config = Config {
///     device: DeviceIdentity::new(DeviceType::DESKTOPMAC, "my-bot"),
///     ..Config::default()
/// };
/// assert_eq!(config.poll_batch_size, 100);
/// ```
#[derive(Clone)]
pub struct Config {
    /// Service host, with or without a scheme. `https://` is assumed.
    pub host:                  String,
    pub endpoints:             Endpoints,
    pub headers:               HeaderNames,
    pub device:                DeviceIdentity,
    /// Deadline for ordinary calls.
    pub request_timeout:       Duration,
    /// How long the service may hold a long poll open.
    pub long_poll_window:      Duration,
    /// How long [`SessionManager::poll_approval`] waits in total.
    pub pairing_timeout:       Duration,
    /// Certificate from an earlier pairing. Presenting it lets approval
    /// skip the PIN. Replaced by the one each new pairing returns.
    pub pairing_certificate:   Option<String>,
    /// Operations requested per poll.
    pub poll_batch_size:       i32,
    /// Retries for [`SessionManager::invoke`] (default: none).
    pub retry_policy:          Arc<dyn RetryPolicy>,
    /// Backoff for the dispatcher's poll loop.
    pub poll_backoff:          Backoff,
    /// Service exception codes meaning the credential is dead.
    pub auth_failure_codes:    Vec<i32>,
    /// HTTP statuses meaning the credential is dead.
    pub auth_failure_statuses: Vec<u16>,
    /// Proxy URL (`http://`, `https://` or `socks5://`) for every request.
    pub proxy:                 Option<String>,
    /// Where [`Client::persist`] and [`Client::restore`] keep the credential.
    pub credential_store:      Arc<dyn CredentialStore>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host:                  "legy.line-apps.com".into(),
            endpoints:             Endpoints::default(),
            headers:               HeaderNames::default(),
            device:                DeviceIdentity::default(),
            request_timeout:       Duration::from_secs(30),
            long_poll_window:      Duration::from_secs(180),
            pairing_timeout:       Duration::from_secs(120),
            pairing_certificate:   None,
            poll_batch_size:       100,
            retry_policy:          Arc::new(NoRetries),
            poll_backoff:          Backoff::default(),
            auth_failure_codes:    vec![1, 8],
            auth_failure_statuses: vec![401, 403],
            proxy:                 None,
            credential_store:      Arc::new(InMemoryStore::new()),
        }
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

struct ClientInner {
    config:  Config,
    session: Arc<SessionManager>,
}

/// The entry point. Cheap to clone: internally Arc-wrapped.
///
/// Nothing touches the network until the first call.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// A client over the default HTTP transport.
    pub fn new(config: Config) -> Self {
        let transport = Arc::new(HttpTransport::new(config.proxy.clone()));
        Self::with_transport(config, transport)
    }

    /// A client over any [`Transport`].
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = watch::channel(SessionState::unauthenticated());
        let channel = Arc::new(Channel::open(transport, &config, rx));
        let session = Arc::new(SessionManager::new(channel, tx, &config));
        log::debug!("[legy] client ready for {} as {}", config.host, config.device.device_type);
        Self { inner: Arc::new(ClientInner { config, session }) }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.inner.config.device
    }

    /// A new dispatcher bound to this client's session.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.inner.session.clone(), &self.inner.config)
    }

    /// Send any call to the talk service with the current credential.
    pub async fn invoke(&self, call: Call) -> Result<Option<TypedValue>, InvocationError> {
        self.inner.session.invoke(Service::Talk, call).await
    }

    /// Fetch the logged-in account's profile.
    pub async fn get_profile(&self) -> Result<Profile, InvocationError> {
        let reply = self.invoke(account::get_profile()).await?;
        let s = reply.as_ref().and_then(TypedValue::as_struct).ok_or_else(|| {
            InvocationError::Protocol(legy_proto::Error::UnexpectedReply("getProfile returned no struct".into()))
        })?;
        Ok(Profile::from_struct(s)?)
    }

    // ── Persistence ────────────────────────────────────────────────────────

    /// Save the current credential to the configured store.
    ///
    /// Returns `false` if there was nothing to save.
    pub fn persist(&self) -> Result<bool, AuthError> {
        let Some(bytes) = self.inner.session.export_credential()? else {
            return Ok(false);
        };
        let store = &self.inner.config.credential_store;
        store.save(&bytes)?;
        log::debug!("[legy] credential saved ({} store)", store.name());
        Ok(true)
    }

    /// Load and re-validate a saved credential.
    ///
    /// Returns `None` if the store is empty.
    pub async fn restore(&self) -> Result<Option<Arc<Credential>>, AuthError> {
        let store = &self.inner.config.credential_store;
        let Some(bytes) = store.load()? else {
            log::debug!("[legy] no saved credential ({} store)", store.name());
            return Ok(None);
        };
        self.inner.session.import_credential(&bytes).await.map(Some)
    }

    /// Delete the saved credential.
    pub fn forget(&self) -> Result<(), AuthError> {
        Ok(self.inner.config.credential_store.delete()?)
    }

    /// Log out if authenticated, forget the saved credential and close the
    /// channel.
    pub async fn shutdown(&self) -> Result<(), AuthError> {
        let logout = if self.inner.session.state() == AuthState::Authenticated {
            self.inner.session.logout().await
        } else {
            Ok(())
        };
        self.forget()?;
        self.close().await;
        logout
    }

    /// Refuse further requests. Running dispatchers stop at their next poll.
    pub async fn close(&self) {
        self.inner.session.channel().close().await;
    }
}

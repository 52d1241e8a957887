//! A logical connection to the service: endpoints, headers, sequence ids.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use legy_proto::{Call, Session, encode_call, read_reply, read_struct_reply};
use legy_thrift::{Protocol, Struct, TypedValue, WireMessage};
use tokio::sync::{Mutex, watch};

use crate::Config;
use crate::errors::{InvocationError, TransportError};
use crate::session::SessionState;
use crate::transport::{HttpRequest, Transport};

/// Extra time the client waits beyond the announced long-poll window.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

// ─── Endpoints ────────────────────────────────────────────────────────────────

/// The remote services this client talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Service {
    /// Ordinary authenticated calls.
    Talk,
    /// Pairing session and challenge calls.
    Pairing,
    /// Pairing approval long-poll.
    PairingPoll,
    /// Operation stream long-poll.
    Poll,
    /// Token refresh.
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub path:      String,
    pub protocol:  Protocol,
    /// Announce the long-poll window and wait for it.
    pub long_poll: bool,
}

impl Endpoint {
    pub fn new(path: impl Into<String>, protocol: Protocol) -> Self {
        Self { path: path.into(), protocol, long_poll: false }
    }

    pub fn long_poll(mut self) -> Self {
        self.long_poll = true;
        self
    }
}

/// Path and encoding per service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub talk:         Endpoint,
    pub pairing:      Endpoint,
    pub pairing_poll: Endpoint,
    pub poll:         Endpoint,
    pub refresh:      Endpoint,
}

impl Endpoints {
    pub fn get(&self, service: Service) -> &Endpoint {
        match service {
            Service::Talk        => &self.talk,
            Service::Pairing     => &self.pairing,
            Service::PairingPoll => &self.pairing_poll,
            Service::Poll        => &self.poll,
            Service::Refresh     => &self.refresh,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            talk:         Endpoint::new("/S4", Protocol::Compact),
            pairing:      Endpoint::new("/acct/lgn/sq/v1", Protocol::Compact),
            pairing_poll: Endpoint::new("/acct/lp/lgn/sq/v1", Protocol::Compact).long_poll(),
            poll:         Endpoint::new("/P4", Protocol::Compact).long_poll(),
            refresh:      Endpoint::new("/EXT/auth/tokenrefresh/v1", Protocol::Compact),
        }
    }
}

/// Names of the service-specific request headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderNames {
    pub application:       String,
    pub access:            String,
    pub long_poll_timeout: String,
    pub language:          String,
    pub protocol_version:  String,
    pub method_hint:       String,
    /// Sent with [`crate::DeviceIdentity::device_id`] when set.
    pub device_id:         Option<String>,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            application:       "x-line-application".into(),
            access:            "x-line-access".into(),
            long_poll_timeout: "x-lst".into(),
            language:          "x-lal".into(),
            protocol_version:  "x-lpv".into(),
            method_hint:       "x-lhm".into(),
            device_id:         None,
        }
    }
}

// ─── Channel ──────────────────────────────────────────────────────────────────

/// Which token a request carries in the access header.
#[derive(Clone, Debug)]
pub enum Access {
    /// The session's current credential, unless it has been invalidated.
    Current,
    /// Nothing.
    Anonymous,
    /// This exact value.
    Token(String),
}

/// Attaches headers and sequence ids to calls and sends them through a
/// [`Transport`]. Safe to share; concurrent calls do not wait on each other.
pub struct Channel {
    transport:        Arc<dyn Transport>,
    base_url:         String,
    endpoints:        Endpoints,
    access_header:    String,
    long_poll_header: String,
    static_headers:   Vec<(String, String)>,
    request_timeout:  Duration,
    long_poll_window: Duration,
    state:            watch::Receiver<SessionState>,
    seq:              Mutex<Session>,
    closed:           AtomicBool,
}

impl Channel {
    /// Prepare a channel. No connection is made until the first request.
    pub fn open(
        transport: Arc<dyn Transport>,
        config:    &Config,
        state:     watch::Receiver<SessionState>,
    ) -> Self {
        let names = &config.headers;
        let device = &config.device;
        let mut static_headers = vec![
            ("accept".to_string(), "application/x-thrift".to_string()),
            ("content-type".to_string(), "application/x-thrift".to_string()),
            ("user-agent".to_string(), device.user_agent()),
            ("accept-encoding".to_string(), "gzip".to_string()),
            (names.application.clone(), device.application_header()),
            (names.language.clone(), device.locale.clone()),
            (names.protocol_version.clone(), "1".to_string()),
            (names.method_hint.clone(), "POST".to_string()),
        ];
        if let Some(name) = &names.device_id {
            static_headers.push((name.clone(), device.device_id.clone()));
        }

        let base_url = if config.host.starts_with("http://") || config.host.starts_with("https://") {
            config.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", config.host)
        };

        Self {
            transport,
            base_url,
            endpoints:        config.endpoints.clone(),
            access_header:    names.access.clone(),
            long_poll_header: names.long_poll_timeout.clone(),
            static_headers,
            request_timeout:  config.request_timeout,
            long_poll_window: config.long_poll_window,
            state,
            seq:              Mutex::new(Session::new()),
            closed:           AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self, service: Service) -> &Endpoint {
        self.endpoints.get(service)
    }

    /// How long a request to `service` may take before it is abandoned.
    pub fn deadline(&self, service: Service) -> Duration {
        if self.endpoints.get(service).long_poll {
            self.long_poll_window + LONG_POLL_GRACE
        } else {
            self.request_timeout
        }
    }

    /// Send raw bytes to `service`.
    pub async fn request(
        &self,
        service: Service,
        body:    Vec<u8>,
        access:  Access,
    ) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed());
        }
        let ep = self.endpoints.get(service);
        let mut headers = self.static_headers.clone();

        let token = match access {
            Access::Current   => self.current_token(),
            Access::Anonymous => None,
            Access::Token(t)  => Some(t),
        };
        if let Some(t) = token {
            headers.push((self.access_header.clone(), t));
        }
        if ep.long_poll {
            headers.push((self.long_poll_header.clone(), self.long_poll_window.as_millis().to_string()));
        }

        let req = HttpRequest {
            url: format!("{}{}", self.base_url, ep.path),
            headers,
            body,
            timeout: self.deadline(service),
        };
        self.transport.request(req).await
    }

    fn current_token(&self) -> Option<String> {
        self.state.borrow().credential.as_ref()
            .filter(|c| c.is_valid())
            .map(|c| c.token().to_string())
    }

    async fn exchange(
        &self,
        service: Service,
        call:    Call,
        access:  Access,
    ) -> Result<(WireMessage, Vec<u8>, Protocol), InvocationError> {
        let protocol = self.endpoints.get(service).protocol;
        let msg = self.seq.lock().await.pack(call);
        log::trace!("[legy] -> {} (seq {})", msg.name, msg.seq_id);
        let bytes = encode_call(&msg, protocol)?;
        let reply = self.request(service, bytes, access).await?;
        Ok((msg, reply, protocol))
    }

    /// Send `call` and return its success value.
    pub async fn call(
        &self,
        service: Service,
        call:    Call,
        access:  Access,
    ) -> Result<Option<TypedValue>, InvocationError> {
        let (msg, reply, protocol) = self.exchange(service, call, access).await?;
        Ok(read_reply(&reply, protocol, &msg)?)
    }

    /// Like [`Channel::call`] for methods returning a struct.
    pub async fn call_struct(
        &self,
        service: Service,
        call:    Call,
        access:  Access,
    ) -> Result<Struct, InvocationError> {
        let (msg, reply, protocol) = self.exchange(service, call, access).await?;
        Ok(read_struct_reply(&reply, protocol, &msg)?)
    }

    /// Refuse further requests and close the transport.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("[legy] channel closed");
            self.transport.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

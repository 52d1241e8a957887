//! A scripted in-memory transport and reply builders shared by the tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use legy_client::{Client, Config, HttpRequest, Transport, TransportError};
use legy_crypto::PairingKeyPair;
use legy_thrift::{
    List, MessageKind, Protocol, Struct, TypedValue, ValueType, WireMessage, decode_message, encode,
    encode_message,
};
use tokio::sync::Notify;

/// What the fake service does with the next request.
pub enum Step {
    /// Succeed with this value in the result field.
    Ok(TypedValue),
    /// Succeed with no value.
    Void,
    /// Raise a declared exception with this code.
    Exception(i32),
    /// Fail below the RPC layer.
    Fail(TransportError),
    /// Keep the request open until `release` is notified, then answer it
    /// with `then`.
    Hold { release: Arc<Notify>, then: Box<Step> },
}

impl Step {
    pub fn held(release: &Arc<Notify>, then: Step) -> Self {
        Step::Hold { release: release.clone(), then: Box::new(then) }
    }
}

/// One request as the fake service saw it.
#[derive(Clone, Debug)]
pub struct Seen {
    pub request: HttpRequest,
    pub method:  String,
    pub args:    Struct,
}

/// Answers requests from a script, in order. Once the script runs out it
/// behaves like an idle long poll: it waits out the request deadline and
/// times out.
#[derive(Default)]
pub struct MockTransport {
    script:    Mutex<VecDeque<Step>>,
    seen:      Mutex<Vec<Seen>>,
    exhausted: Notify,
    holding:   Notify,
}

impl MockTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let mock = Self::default();
        mock.script.lock().unwrap().extend(steps);
        Arc::new(mock)
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.seen().into_iter().map(|s| s.method).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.seen().iter().filter(|s| s.method == method).count()
    }

    /// Resolves once a request has arrived with nothing left to answer it.
    pub async fn exhausted(&self) {
        self.exhausted.notified().await;
    }

    /// Resolves once a request is being held by a [`Step::Hold`].
    pub async fn holding(&self) {
        self.holding.notified().await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, req: HttpRequest) -> Result<Vec<u8>, TransportError> {
        let call = decode_message(&req.body, Protocol::Compact).expect("client sent an undecodable call");
        self.seen.lock().unwrap().push(Seen {
            request: req.clone(),
            method:  call.name.clone(),
            args:    call.body.clone(),
        });
        let step = self.script.lock().unwrap().pop_front();

        let Some(mut step) = step else {
            self.exhausted.notify_one();
            tokio::time::sleep(req.timeout).await;
            return Err(TransportError::timeout());
        };
        while let Step::Hold { release, then } = step {
            self.holding.notify_one();
            release.notified().await;
            step = *then;
        }
        let body = match step {
            Step::Ok(value)       => Struct::new().with(0, value),
            Step::Void            => Struct::new(),
            Step::Exception(code) => Struct::new().with(1, Struct::new().with(1, code).with(2, "scripted")),
            Step::Fail(e)         => return Err(e),
            Step::Hold { .. }     => unreachable!("unwrapped above"),
        };
        let reply = WireMessage { name: call.name, kind: MessageKind::Reply, seq_id: call.seq_id, body };
        Ok(encode_message(&reply, Protocol::Compact).unwrap())
    }
}

// ── Clients ───────────────────────────────────────────────────────────────────

pub fn client_with(config: Config, steps: impl IntoIterator<Item = Step>) -> (Client, Arc<MockTransport>) {
    let mock = MockTransport::new(steps);
    (Client::with_transport(config, mock.clone()), mock)
}

pub fn client(steps: impl IntoIterator<Item = Step>) -> (Client, Arc<MockTransport>) {
    client_with(Config::default(), steps)
}

/// A client already logged in with token `"tok"` as account `"u-me"`.
pub async fn logged_in(steps: impl IntoIterator<Item = Step>) -> (Client, Arc<MockTransport>) {
    let (client, mock) = client([Step::Ok(profile("u-me"))]);
    client.session().login_with_token("tok").await.unwrap();
    for step in steps {
        mock.push(step);
    }
    (client, mock)
}

// ── Replies ───────────────────────────────────────────────────────────────────

pub fn profile(account_id: &str) -> TypedValue {
    Struct::new().with(1, account_id).with(20, "Someone").into()
}

pub fn ops(items: Vec<Struct>) -> TypedValue {
    List::with_items(ValueType::Struct, items.into_iter().map(TypedValue::from).collect()).into()
}

pub fn op(revision: i64, kind: i32) -> Struct {
    Struct::new().with(1, revision).with(2, 1_700_000_000_000i64).with(3, kind)
}

pub fn text_op(revision: i64, from: &str, to: &str, text: &str) -> Struct {
    let msg = Struct::new()
        .with(1, from)
        .with(2, to)
        .with(4, format!("m{revision}"))
        .with(10, text);
    op(revision, 26).with(20, msg)
}

pub fn end_marker(revision: i64, global: i64, individual: i64) -> Struct {
    op(revision, 0)
        .with(10, format!("{global}\u{1e}x"))
        .with(11, format!("{individual}\u{1e}y"))
}

/// The approving device's answer to the login call: its public key and a
/// token bundle sealed for `ours`.
pub fn sealed_login(ours: &[u8; 32], token: &str) -> TypedValue {
    let remote = PairingKeyPair::generate().unwrap();
    let key = remote.agree(ours).unwrap();
    let info = Struct::new().with(1, token).with(2, "refresh-1").with(3, 3600i64);
    let plain = encode(&TypedValue::Struct(info), Protocol::Compact).unwrap();
    Struct::new()
        .with(1, "cert-1")
        .with(4, "u-paired")
        .with(10, remote.public_bytes().to_vec())
        .with(11, key.seal(&plain).unwrap())
        .into()
}

/// A `createPinCode` reply.
pub fn pin(code: &str) -> Step {
    Step::Ok(Struct::new().with(1, code).into())
}

pub fn disconnected() -> Step {
    Step::Fail(TransportError::disconnected("connection reset"))
}

pub fn status(code: u16) -> Step {
    Step::Fail(TransportError::status(code, Vec::new()))
}

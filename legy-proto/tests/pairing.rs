use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use legy_crypto::{CryptoError, PairingKeyPair};
use legy_proto::pairing::{self, Challenge};
use legy_proto::schema::method;
use legy_proto::{ApprovalStatus, Error, PairingChallenge, ServiceException};
use legy_thrift::{Protocol, Struct, TypedValue, encode};

const CALLBACK: &str = "https://line.me/R/au/g/SQR1";

fn challenge() -> (PairingChallenge, Challenge) {
    let (call, s1) = pairing::step1().unwrap();
    assert_eq!(call.method, method::CREATE_SESSION);

    let (call, s2) = pairing::step2(s1, &Struct::new().with(1, "SQR1")).unwrap();
    assert_eq!(call.method, method::CREATE_QR_CODE);
    assert_eq!(call.args.get_struct(1).unwrap().get_str(1), Some("SQR1"));

    pairing::step3(s2, &Struct::new().with(1, CALLBACK)).unwrap()
}

fn service(code: i32) -> Error {
    Error::Service(ServiceException { field: 1, code, reason: String::new(), parameters: vec![] })
}

/// What the approving device sends back: its public key and the sealed token.
fn login_reply(ours: &[u8; 32], info: Struct) -> Struct {
    let remote = PairingKeyPair::generate().unwrap();
    let key = remote.agree(ours).unwrap();
    let plain = encode(&TypedValue::Struct(info), Protocol::Compact).unwrap();
    Struct::new()
        .with(1, "cert-1")
        .with(4, "u0123")
        .with(10, remote.public_bytes().to_vec())
        .with(11, key.seal(&plain).unwrap())
}

fn token_info() -> Struct {
    Struct::new().with(1, "access").with(2, "refresh").with(3, 3600i64)
}

// ── Challenge ─────────────────────────────────────────────────────────────────

#[test]
fn url_embeds_public_key_and_version() {
    let (ch, pending) = challenge();
    let secret = urlencoding::encode(&STANDARD.encode(ch.public_key)).into_owned();
    assert_eq!(ch.url, format!("{CALLBACK}?secret={secret}&e2eeVersion=1"));
    assert_eq!(ch.session_id, "SQR1");
    assert_eq!(pending.session_id(), "SQR1");
}

#[test]
fn url_with_query_appends_parameters() {
    let (_, s1) = pairing::step1().unwrap();
    let (_, s2) = pairing::step2(s1, &Struct::new().with(1, "S")).unwrap();
    let (ch, _) = pairing::step3(s2, &Struct::new().with(1, "https://x/y?a=b")).unwrap();
    assert!(ch.url.starts_with("https://x/y?a=b&secret="));
}

#[test]
fn missing_session_id_is_unexpected() {
    let (_, s1) = pairing::step1().unwrap();
    assert!(matches!(pairing::step2(s1, &Struct::new()), Err(Error::UnexpectedReply(_))));
}

#[test]
fn missing_callback_url_is_unexpected() {
    let (_, s1) = pairing::step1().unwrap();
    let (_, s2) = pairing::step2(s1, &Struct::new().with(1, "S")).unwrap();
    assert!(matches!(pairing::step3(s2, &Struct::new()), Err(Error::UnexpectedReply(_))));
}

#[test]
fn debug_hides_the_secret_key() {
    let keys = PairingKeyPair::from_secret_bytes([7u8; 32]);
    let (_, s1) = pairing::step1_with_keys(keys);
    let (_, s2) = pairing::step2(s1, &Struct::new().with(1, "S")).unwrap();
    let (_, pending) = pairing::step3(s2, &Struct::new().with(1, "https://x")).unwrap();
    let dbg = format!("{pending:?}");
    assert!(!dbg.contains("7, 7, 7"));
    assert!(dbg.contains("session_id"));
}

// ── Status ────────────────────────────────────────────────────────────────────

#[test]
fn status_call_names_the_session() {
    let (_, pending) = challenge();
    let call = pending.status_call();
    assert_eq!(call.method, method::CHECK_QR_CODE_VERIFIED);
    assert_eq!(call.args.get_struct(1).unwrap().get_str(1), Some("SQR1"));
    assert_eq!(pending.read_status(Err(service(4))).unwrap(), ApprovalStatus::Pending);
}

#[test]
fn empty_success_means_approved() {
    assert_eq!(ApprovalStatus::from_reply(Ok(Struct::new())).unwrap(), ApprovalStatus::Approved);
}

#[test]
fn explicit_status_is_mapped() {
    let cases = [
        (0i32, ApprovalStatus::Pending),
        (1, ApprovalStatus::Approved),
        (2, ApprovalStatus::Denied),
        (3, ApprovalStatus::Expired),
    ];
    for (code, want) in cases {
        let got = ApprovalStatus::from_reply(Ok(Struct::new().with(1, code))).unwrap();
        assert_eq!(got, want, "status {code}");
    }
}

#[test]
fn unknown_status_is_an_error() {
    assert!(ApprovalStatus::from_reply(Ok(Struct::new().with(1, 9i32))).is_err());
}

#[test]
fn pairing_exceptions_map_to_statuses() {
    assert_eq!(ApprovalStatus::from_reply(Err(service(4))).unwrap(), ApprovalStatus::Pending);
    assert_eq!(ApprovalStatus::from_reply(Err(service(2))).unwrap(), ApprovalStatus::Denied);
    assert_eq!(ApprovalStatus::from_reply(Err(service(3))).unwrap(), ApprovalStatus::Expired);
    assert_eq!(ApprovalStatus::from_reply(Err(service(100))).unwrap(), ApprovalStatus::Expired);
}

#[test]
fn other_errors_pass_through() {
    assert_eq!(ApprovalStatus::from_reply(Err(service(77))).unwrap_err(), service(77));
    let e = Error::UnexpectedReply("x".into());
    assert_eq!(ApprovalStatus::from_reply(Err(e.clone())).unwrap_err(), e);
}

// ── Certificate and PIN ───────────────────────────────────────────────────────

#[test]
fn certificate_call_carries_session_and_certificate() {
    let (_, pending) = challenge();
    let call = pending.verify_certificate_call("cert-0");
    assert_eq!(call.method, method::VERIFY_CERTIFICATE);
    let req = call.args.get_struct(1).unwrap();
    assert_eq!(req.get_str(1), Some("SQR1"));
    assert_eq!(req.get_str(2), Some("cert-0"));
}

#[test]
fn pin_calls_name_the_session() {
    let (_, pending) = challenge();
    let create = pending.pin_call();
    assert_eq!(create.method, method::CREATE_PIN_CODE);
    assert_eq!(create.args.get_struct(1).unwrap().get_str(1), Some("SQR1"));

    let check = pending.pin_status_call();
    assert_eq!(check.method, method::CHECK_PIN_CODE_VERIFIED);
    assert_eq!(check.args.get_struct(1).unwrap().get_str(1), Some("SQR1"));
}

#[test]
fn pin_is_read_from_the_reply() {
    let (_, pending) = challenge();
    assert_eq!(pending.read_pin(&Struct::new().with(1, "482913")).unwrap(), "482913");
    assert!(matches!(pending.read_pin(&Struct::new()), Err(Error::UnexpectedReply(_))));
    assert!(matches!(pending.read_pin(&Struct::new().with(1, "")), Err(Error::UnexpectedReply(_))));
}

// ── Key exchange ──────────────────────────────────────────────────────────────

#[test]
fn approve_builds_login_call() {
    let (_, pending) = challenge();
    let (call, kx) = pending.approve("WINDOWS", "legy");
    assert_eq!(call.method, method::QR_CODE_LOGIN_V2);
    let req = call.args.get_struct(1).unwrap();
    assert_eq!(req.get_str(1), Some("SQR1"));
    assert_eq!(req.get_str(2), Some("WINDOWS"));
    assert_eq!(req.get_str(3), Some("legy"));
    assert_eq!(req.get_bool(4), Some(true));
    assert_eq!(kx.session_id(), "SQR1");
}

#[test]
fn finish_opens_the_sealed_token() {
    let (ch, pending) = challenge();
    let (_, kx) = pending.approve("WINDOWS", "legy");
    let cred = pairing::finish(kx, &login_reply(&ch.public_key, token_info())).unwrap();
    assert_eq!(cred.token(), "access");
    assert_eq!(cred.refresh_token(), Some("refresh"));
    assert_eq!(cred.account_id(), Some("u0123"));
    assert_eq!(cred.certificate(), Some("cert-1"));
    assert!(cred.is_valid());
    assert!(cred.refresh_due().is_some());
}

#[test]
fn token_sealed_for_another_key_fails() {
    let (_, pending) = challenge();
    let (_, kx) = pending.approve("WINDOWS", "legy");
    let stranger = PairingKeyPair::generate().unwrap().public_bytes();
    let err = pairing::finish(kx, &login_reply(&stranger, token_info())).unwrap_err();
    assert_eq!(err, Error::Crypto(CryptoError::AuthenticationFailed));
}

#[test]
fn missing_peer_key_fails() {
    let (ch, pending) = challenge();
    let (_, kx) = pending.approve("WINDOWS", "legy");
    let full = login_reply(&ch.public_key, token_info());
    let stripped = Struct::new().with(11, full.get_bytes(11).unwrap().to_vec());
    assert!(matches!(pairing::finish(kx, &stripped), Err(Error::UnexpectedReply(_))));
}

#[test]
fn token_info_without_access_token_fails() {
    let (ch, pending) = challenge();
    let (_, kx) = pending.approve("WINDOWS", "legy");
    let reply = login_reply(&ch.public_key, Struct::new().with(2, "refresh"));
    assert!(matches!(pairing::finish(kx, &reply), Err(Error::UnexpectedReply(_))));
}

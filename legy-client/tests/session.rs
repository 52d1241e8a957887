mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockTransport, Step, client, client_with, disconnected, logged_in, pin, profile, sealed_login, status};
use legy_client::{
    Approval, AuthError, AuthState, Backoff, Config, Credential, DeviceIdentity, DeviceType, InMemoryStore,
    InvocationError, PairingPrompt, SessionManager,
};
use legy_crypto::PairingKeyPair;
use legy_thrift::Struct;
use tokio::sync::Notify;

const CALLBACK: &str = "https://line.me/R/au/g/SQR1";
const PIN: &str = "482913";

fn challenge_steps() -> [Step; 2] {
    [
        Step::Ok(Struct::new().with(1, "SQR1").into()),
        Step::Ok(Struct::new().with(1, CALLBACK).into()),
    ]
}

/// Script a scan, a PIN confirmation and a login reply sealed for `key`.
fn script_pin_approval(mock: &MockTransport, key: &[u8; 32], token: &str) {
    mock.push(Step::Void);
    mock.push(pin(PIN));
    mock.push(Step::Void);
    mock.push(Step::Ok(sealed_login(key, token)));
}

async fn approve_with_pin(session: &SessionManager) {
    assert_eq!(session.poll_approval().await.unwrap(), Approval::PinRequired(PIN.into()));
    assert_eq!(session.state(), AuthState::Challenging);
    assert_eq!(session.poll_approval().await.unwrap(), Approval::Granted);
}

// ── Pairing ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pairing_walks_every_state() {
    let (client, mock) = client(challenge_steps());
    let session = client.session();

    let ch = session.start_pairing().await.unwrap();
    assert_eq!(session.state(), AuthState::Challenging);
    assert_eq!(ch.session_id, "SQR1");
    assert!(ch.url.starts_with(CALLBACK));
    assert!(ch.url.ends_with("&e2eeVersion=1"));

    mock.push(Step::Exception(4));
    script_pin_approval(&mock, &ch.public_key, "access-1");
    approve_with_pin(session).await;
    assert_eq!(session.state(), AuthState::KeyExchanging);
    assert!(session.credential().is_none());

    let cred = session.derive_secret().await.unwrap();
    assert_eq!(session.state(), AuthState::Authenticated);
    assert_eq!(cred.token(), "access-1");
    assert_eq!(cred.refresh_token(), Some("refresh-1"));
    assert_eq!(cred.account_id(), Some("u-paired"));
    assert_eq!(cred.certificate(), Some("cert-1"));
    assert_eq!(session.pairing_certificate().as_deref(), Some("cert-1"));

    assert_eq!(mock.methods(), [
        "createSession", "createQrCode", "checkQrCodeVerified", "checkQrCodeVerified",
        "createPinCode", "checkPinCodeVerified", "qrCodeLoginV2",
    ]);
    let seen = mock.seen();
    assert_eq!(seen[0].request.header("x-line-access"), None);
    assert!(seen[0].request.url.ends_with("/acct/lgn/sq/v1"));
    assert_eq!(seen[2].request.header("x-line-access"), Some("SQR1"));
    assert_eq!(seen[2].request.header("x-lst"), Some("180000"));
    assert!(seen[2].request.url.ends_with("/acct/lp/lgn/sq/v1"));
    assert_eq!(seen[4].request.header("x-line-access"), None);
    assert_eq!(seen[4].args.get_struct(1).unwrap().get_str(1), Some("SQR1"));
    assert_eq!(seen[5].request.header("x-line-access"), Some("SQR1"));
    assert!(seen[5].request.url.ends_with("/acct/lp/lgn/sq/v1"));
    assert_eq!(seen[6].request.header("x-line-access"), None);

    let login = seen[6].args.get_struct(1).unwrap();
    assert_eq!(login.get_str(1), Some("SQR1"));
    assert_eq!(login.get_str(2), Some("WINDOWS"));
    assert_eq!(login.get_bool(4), Some(true));
}

#[tokio::test]
async fn login_with_pairing_shows_every_prompt() {
    let (client, mock) = client(challenge_steps());

    let mut shown = Vec::new();
    let cred = client.session()
        .login_with_pairing(|prompt| {
            if let PairingPrompt::Challenge(ch) = prompt {
                script_pin_approval(&mock, &ch.public_key, "access-2");
            }
            shown.push(prompt.to_string());
        })
        .await
        .unwrap();

    assert_eq!(cred.token(), "access-2");
    assert_eq!(shown.len(), 2);
    assert!(shown[0].starts_with(&format!("scan {CALLBACK}?secret=")));
    assert_eq!(shown[1], format!("enter PIN {PIN}"));
}

#[tokio::test]
async fn known_certificate_skips_the_pin() {
    let config = Config { pairing_certificate: Some("cert-0".into()), ..Config::default() };
    let (client, mock) = client_with(config, challenge_steps());
    let session = client.session();
    let ch = session.start_pairing().await.unwrap();

    mock.push(Step::Void);
    mock.push(Step::Void);
    mock.push(Step::Ok(sealed_login(&ch.public_key, "access-4")));
    assert_eq!(session.poll_approval().await.unwrap(), Approval::Granted);
    session.derive_secret().await.unwrap();

    assert_eq!(mock.methods()[2..], ["checkQrCodeVerified", "verifyCertificate", "qrCodeLoginV2"]);
    let verify = &mock.seen()[3];
    assert_eq!(verify.request.header("x-line-access"), None);
    let req = verify.args.get_struct(1).unwrap();
    assert_eq!(req.get_str(1), Some("SQR1"));
    assert_eq!(req.get_str(2), Some("cert-0"));
    // the new pairing's certificate replaces the configured one
    assert_eq!(session.pairing_certificate().as_deref(), Some("cert-1"));
}

#[tokio::test]
async fn refused_certificate_falls_back_to_pin() {
    let config = Config { pairing_certificate: Some("stale".into()), ..Config::default() };
    let (client, mock) = client_with(config, challenge_steps());
    let session = client.session();
    session.start_pairing().await.unwrap();

    mock.push(Step::Void);
    mock.push(Step::Exception(20));
    mock.push(pin(PIN));
    assert_eq!(session.poll_approval().await.unwrap(), Approval::PinRequired(PIN.into()));
    assert_eq!(mock.methods()[2..], ["checkQrCodeVerified", "verifyCertificate", "createPinCode"]);
}

#[tokio::test]
async fn next_pairing_presents_the_last_certificate() {
    let (client, mock) = client(challenge_steps());
    let session = client.session();
    let ch = session.start_pairing().await.unwrap();
    script_pin_approval(&mock, &ch.public_key, "access-5");
    approve_with_pin(session).await;
    session.derive_secret().await.unwrap();

    mock.push(Step::Void);
    session.logout().await.unwrap();

    for step in challenge_steps() {
        mock.push(step);
    }
    let ch = session.start_pairing().await.unwrap();
    mock.push(Step::Void);
    mock.push(Step::Void);
    mock.push(Step::Ok(sealed_login(&ch.public_key, "access-6")));
    assert_eq!(session.poll_approval().await.unwrap(), Approval::Granted);

    let verify = mock.seen().into_iter().find(|s| s.method == "verifyCertificate").unwrap();
    assert_eq!(verify.args.get_struct(1).unwrap().get_str(2), Some("cert-1"));
    assert_eq!(session.derive_secret().await.unwrap().token(), "access-6");
}

#[tokio::test]
async fn denied_pin_returns_to_unauthenticated() {
    let (client, mock) = client(challenge_steps());
    let session = client.session();
    session.start_pairing().await.unwrap();

    mock.push(Step::Void);
    mock.push(pin(PIN));
    assert!(matches!(session.poll_approval().await, Ok(Approval::PinRequired(_))));

    mock.push(Step::Ok(Struct::new().with(1, 2i32).into()));
    assert!(matches!(session.poll_approval().await, Err(AuthError::PairingRejected)));
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert_eq!(mock.methods().last().map(String::as_str), Some("checkPinCodeVerified"));
}

#[tokio::test]
async fn denied_pairing_returns_to_unauthenticated() {
    let (client, mock) = client(challenge_steps());
    let session = client.session();
    session.start_pairing().await.unwrap();

    mock.push(Step::Ok(Struct::new().with(1, 2i32).into()));
    assert!(matches!(session.poll_approval().await, Err(AuthError::PairingRejected)));
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert!(session.credential().is_none());
}

#[tokio::test]
async fn expired_pairing_leaves_no_credential() {
    let (client, mock) = client(challenge_steps());
    let session = client.session();
    session.start_pairing().await.unwrap();

    mock.push(Step::Exception(3));
    assert!(matches!(session.poll_approval().await, Err(AuthError::PairingExpired)));
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert!(session.credential().is_none());

    // the challenge is gone
    assert!(matches!(session.poll_approval().await, Err(AuthError::InvalidState { .. })));
}

#[tokio::test]
async fn failed_pairing_after_invalidation_leaves_no_credential() {
    let (client, mock) = logged_in([status(401)]).await;
    let session = client.session();
    assert!(client.get_profile().await.is_err());
    assert!(!session.credential().unwrap().is_valid());

    // an invalidated token is never sent again
    mock.push(Step::Ok(profile("u-me")));
    client.get_profile().await.unwrap();
    assert_eq!(mock.seen().pop().unwrap().request.header("x-line-access"), None);

    for step in challenge_steps() {
        mock.push(step);
    }
    session.start_pairing().await.unwrap();
    assert!(session.credential().is_none());

    mock.push(Step::Exception(3));
    assert!(matches!(session.poll_approval().await, Err(AuthError::PairingExpired)));
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert!(session.credential().is_none());

    mock.push(Step::Ok(profile("u-me")));
    client.get_profile().await.unwrap();
    assert_eq!(mock.seen().pop().unwrap().request.header("x-line-access"), None);
}

#[tokio::test(start_paused = true)]
async fn approval_times_out_as_expired() {
    let config = Config { pairing_timeout: Duration::from_secs(5), ..Config::default() };
    let (client, mock) = client_with(config, challenge_steps());
    let session = client.session();
    session.start_pairing().await.unwrap();

    // nothing scripted: every status check hangs
    assert!(matches!(session.poll_approval().await, Err(AuthError::PairingExpired)));
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert_eq!(mock.count("checkQrCodeVerified"), 1);
}

#[tokio::test]
async fn transport_failure_keeps_the_challenge() {
    let (client, mock) = client(challenge_steps());
    let session = client.session();
    let ch = session.start_pairing().await.unwrap();

    mock.push(disconnected());
    match session.poll_approval().await {
        Err(AuthError::Invocation(e)) => assert!(e.is_disconnected()),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.state(), AuthState::Challenging);

    script_pin_approval(&mock, &ch.public_key, "access-3");
    approve_with_pin(session).await;
    assert_eq!(session.derive_secret().await.unwrap().token(), "access-3");
}

#[tokio::test]
async fn failed_key_exchange_is_not_retried() {
    let (client, mock) = client(challenge_steps());
    let session = client.session();
    session.start_pairing().await.unwrap();

    let stranger = PairingKeyPair::generate().unwrap().public_bytes();
    script_pin_approval(&mock, &stranger, "access");
    approve_with_pin(session).await;

    assert!(matches!(session.derive_secret().await, Err(AuthError::KeyExchangeFailed(_))));
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert!(session.credential().is_none());
    assert!(matches!(session.derive_secret().await, Err(AuthError::InvalidState { .. })));
}

#[tokio::test]
async fn pairing_refused_while_authenticated() {
    let (client, _mock) = logged_in([]).await;
    assert!(matches!(client.session().start_pairing().await, Err(AuthError::AlreadyAuthenticated)));
}

// ── Tokens ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn token_login_checks_the_token() {
    let (client, mock) = client([Step::Ok(profile("u-me"))]);
    let cred = client.session().login_with_token("tok").await.unwrap();

    assert_eq!(client.session().state(), AuthState::Authenticated);
    assert_eq!(cred.token(), "tok");
    assert_eq!(cred.account_id(), Some("u-me"));

    let seen = mock.seen();
    assert_eq!(seen[0].method, "getProfile");
    assert_eq!(seen[0].request.header("x-line-access"), Some("tok"));
    assert!(seen[0].request.url.ends_with("/S4"));
    assert_eq!(seen[0].request.header("x-lst"), None);
}

#[tokio::test]
async fn rejected_token_stays_unauthenticated() {
    let (client, _mock) = client([Step::Exception(8)]);
    assert!(matches!(client.session().login_with_token("bad").await, Err(AuthError::InvalidCredential)));
    assert_eq!(client.session().state(), AuthState::Unauthenticated);
    assert!(client.session().credential().is_none());

    let (client, _mock) = common::client([status(401)]);
    assert!(matches!(client.session().login_with_token("bad").await, Err(AuthError::InvalidCredential)));
}

#[tokio::test]
async fn second_login_is_refused() {
    let (client, _mock) = logged_in([]).await;
    assert!(matches!(
        client.session().login_with_token("other").await,
        Err(AuthError::AlreadyAuthenticated)
    ));
}

// ── Invalidation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn auth_failure_on_any_call_is_broadcast() {
    let (client, _mock) = logged_in([Step::Exception(1)]).await;
    let mut rx = client.session().subscribe();

    let err = client.get_profile().await.unwrap_err();
    assert_eq!(err.service_code(), Some(1));

    rx.changed().await.unwrap();
    let state = rx.borrow().clone();
    assert_eq!(state.phase, AuthState::Unauthenticated);
    let cred = state.credential.unwrap();
    assert_eq!(cred.token(), "tok");
    assert!(!cred.is_valid());
}

#[tokio::test]
async fn http_auth_status_invalidates() {
    let (client, _mock) = logged_in([status(403)]).await;
    assert!(client.get_profile().await.is_err());
    assert_eq!(client.session().state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn other_failures_do_not_invalidate() {
    let (client, _mock) = logged_in([Step::Exception(20), status(500), disconnected()]).await;
    for _ in 0..3 {
        assert!(client.get_profile().await.is_err());
        assert_eq!(client.session().state(), AuthState::Authenticated);
    }
}

#[tokio::test]
async fn late_rejection_of_a_replaced_token_is_ignored() {
    let first = Struct::new().with(1, "tok-a").with(2, 3600i64).with(5, "r2");
    let (client, mock) = client([Step::Ok(first.into())]);
    client.session().import_credential(&refreshable()).await.unwrap();

    let release = Arc::new(Notify::new());
    mock.push(Step::held(&release, status(401)));
    mock.push(Step::Ok(Struct::new().with(1, "tok-b").with(2, 3600i64).into()));

    let slow = tokio::spawn({
        let client = client.clone();
        async move { client.get_profile().await }
    });
    mock.holding().await;
    assert_eq!(client.session().refresh().await.unwrap().token(), "tok-b");
    release.notify_one();

    let err = slow.await.unwrap().unwrap_err();
    assert!(client.session().is_auth_failure(&err));
    assert_eq!(client.session().state(), AuthState::Authenticated);
    let cred = client.session().credential().unwrap();
    assert_eq!(cred.token(), "tok-b");
    assert!(cred.is_valid());

    let held = mock.seen().into_iter().find(|s| s.method == "getProfile").unwrap();
    assert_eq!(held.request.header("x-line-access"), Some("tok-a"));
}

#[tokio::test]
async fn invalidate_is_idempotent() {
    let (client, _mock) = logged_in([]).await;
    let mut rx = client.session().subscribe();

    client.session().invalidate();
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();
    client.session().invalidate();
    assert!(!rx.has_changed().unwrap());
}

// ── Refresh and logout ────────────────────────────────────────────────────────

fn refreshable() -> Vec<u8> {
    Credential::new("old")
        .with_refresh_token("r1")
        .with_account_id("u1")
        .invalidated()
        .export()
        .unwrap()
}

#[tokio::test]
async fn invalid_import_is_refreshed() {
    let reply = Struct::new().with(1, "new").with(2, 3600i64).with(5, "r2");
    let (client, mock) = client([Step::Ok(reply.into())]);

    let cred = client.session().import_credential(&refreshable()).await.unwrap();
    assert_eq!(client.session().state(), AuthState::Authenticated);
    assert_eq!(cred.token(), "new");
    assert_eq!(cred.refresh_token(), Some("r2"));
    assert_eq!(cred.account_id(), Some("u1"));
    assert!(cred.refresh_due().is_some());

    let seen = mock.seen();
    assert_eq!(seen[0].method, "refresh");
    assert!(seen[0].request.url.ends_with("/EXT/auth/tokenrefresh/v1"));
    assert_eq!(seen[0].args.get_struct(1).unwrap().get_str(1), Some("r1"));
}

#[tokio::test]
async fn rejected_refresh_is_invalid_credential() {
    let (client, _mock) = client([Step::Exception(1)]);
    assert!(matches!(
        client.session().import_credential(&refreshable()).await,
        Err(AuthError::InvalidCredential)
    ));
    assert_eq!(client.session().state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn refresh_without_refresh_token_fails() {
    let (client, _mock) = logged_in([]).await;
    assert!(matches!(client.session().refresh().await, Err(AuthError::InvalidCredential)));

    let (client, _mock) = common::client([]);
    assert!(matches!(client.session().refresh().await, Err(AuthError::InvalidState { .. })));
}

#[tokio::test]
async fn refresh_if_due_waits_for_the_deadline() {
    let reply = Struct::new().with(1, "new").with(2, 3600i64);
    let (client, mock) = client([Step::Ok(reply.into())]);
    client.session().import_credential(&refreshable()).await.unwrap();

    // fresh one-hour lifetime: nothing to do yet
    assert!(!client.session().refresh_if_due().await.unwrap());
    assert_eq!(mock.count("refresh"), 1);
}

#[tokio::test]
async fn due_credential_is_refreshed() {
    let due = Credential::new("tok").with_refresh_token("r1").with_lifetime_secs(0).export().unwrap();
    let (client, mock) = client([
        Step::Ok(profile("u-me")),
        Step::Ok(Struct::new().with(1, "new").with(2, 3600i64).into()),
    ]);
    client.session().import_credential(&due).await.unwrap();

    assert!(client.session().refresh_if_due().await.unwrap());
    assert_eq!(mock.count("refresh"), 1);
    assert_eq!(client.session().credential().unwrap().token(), "new");
}

#[tokio::test]
async fn primary_devices_never_refresh() {
    let config = Config { device: DeviceIdentity::new(DeviceType::ANDROID, "pixel"), ..Config::default() };
    let (client, mock) = client_with(config, []);
    assert!(matches!(
        client.session().import_credential(&refreshable()).await,
        Err(AuthError::PrimaryDevice(DeviceType::ANDROID))
    ));

    let due = Credential::new("tok").with_refresh_token("r1").with_lifetime_secs(0).export().unwrap();
    mock.push(Step::Ok(profile("u-me")));
    client.session().import_credential(&due).await.unwrap();
    assert!(!client.session().refresh_if_due().await.unwrap());
    assert!(matches!(client.session().refresh().await, Err(AuthError::PrimaryDevice(_))));
    assert_eq!(mock.count("refresh"), 0);
    assert_eq!(client.session().state(), AuthState::Authenticated);
}

#[tokio::test]
async fn logout_drops_the_credential() {
    let (client, mock) = logged_in([Step::Void]).await;
    client.session().logout().await.unwrap();

    assert_eq!(client.session().state(), AuthState::Unauthenticated);
    assert!(client.session().credential().is_none());
    let last = mock.seen().pop().unwrap();
    assert_eq!(last.method, "logoutZ");
    assert_eq!(last.request.header("x-line-access"), Some("tok"));
}

#[tokio::test]
async fn logout_drops_the_credential_even_on_failure() {
    let (client, _mock) = logged_in([disconnected()]).await;
    assert!(matches!(client.session().logout().await, Err(AuthError::Invocation(_))));
    assert!(client.session().credential().is_none());

    let (client, _mock) = logged_in([Step::Exception(8)]).await;
    client.session().logout().await.unwrap();
}

// ── Persistence ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn exported_credential_imports_elsewhere() {
    let (first, _mock) = logged_in([]).await;
    let bytes = first.session().export_credential().unwrap().unwrap();

    let (second, mock) = client([Step::Ok(profile("u-me"))]);
    let cred = second.session().import_credential(&bytes).await.unwrap();
    assert_eq!(cred.token(), "tok");
    assert_eq!(second.session().state(), AuthState::Authenticated);
    assert_eq!(mock.seen()[0].request.header("x-line-access"), Some("tok"));
}

#[tokio::test]
async fn garbage_import_is_invalid_credential() {
    let (client, _mock) = client([]);
    assert!(matches!(
        client.session().import_credential(b"\x09nonsense").await,
        Err(AuthError::InvalidCredential)
    ));
    assert!(client.session().export_credential().unwrap().is_none());
}

#[tokio::test]
async fn persist_and_restore_share_a_store() {
    let store = Arc::new(InMemoryStore::new());
    let config = Config { credential_store: store.clone(), ..Config::default() };

    let (first, _mock) = client_with(config.clone(), [Step::Ok(profile("u-me"))]);
    assert!(!first.persist().unwrap());
    first.session().login_with_token("tok").await.unwrap();
    assert!(first.persist().unwrap());

    let (second, _mock) = client_with(config.clone(), [Step::Ok(profile("u-me"))]);
    let cred = second.restore().await.unwrap().unwrap();
    assert_eq!(cred.token(), "tok");

    second.forget().unwrap();
    let (third, mock) = client_with(config, []);
    assert!(third.restore().await.unwrap().is_none());
    assert!(mock.seen().is_empty());
}

// ── Retries ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn invoke_retries_transient_failures() {
    let config = Config { retry_policy: Arc::new(Backoff::default()), ..Config::default() };
    let (client, mock) = client_with(config, [Step::Ok(profile("u-me")), disconnected(), Step::Ok(profile("u-me"))]);
    client.session().login_with_token("tok").await.unwrap();

    let p = client.get_profile().await.unwrap();
    assert_eq!(p.account_id, "u-me");
    assert_eq!(mock.count("getProfile"), 3);
}

#[tokio::test(start_paused = true)]
async fn invoke_never_retries_auth_failures() {
    let config = Config { retry_policy: Arc::new(Backoff::default()), ..Config::default() };
    let (client, mock) = client_with(config, [Step::Ok(profile("u-me")), status(401)]);
    client.session().login_with_token("tok").await.unwrap();

    match client.get_profile().await {
        Err(InvocationError::Transport(e)) => assert_eq!(e.status_code(), Some(401)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(mock.count("getProfile"), 2);
}

#[tokio::test]
async fn closed_client_refuses_calls() {
    let (client, _mock) = logged_in([]).await;
    client.close().await;
    assert!(client.session().channel().is_closed());
    match client.get_profile().await {
        Err(InvocationError::Transport(e)) => assert_eq!(e.kind, legy_client::TransportErrorKind::Closed),
        other => panic!("unexpected {other:?}"),
    }
}

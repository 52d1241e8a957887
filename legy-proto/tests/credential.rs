use legy_proto::account::{self, read_refresh};
use legy_proto::schema::method;
use legy_proto::{Credential, Error, Profile};
use legy_thrift::Struct;

fn sample() -> Credential {
    Credential::new("secret-token")
        .with_refresh_token("secret-refresh")
        .with_account_id("u0123")
        .with_certificate("cert")
        .with_lifetime_secs(86_400)
}

// ── Export ────────────────────────────────────────────────────────────────────

#[test]
fn export_then_import_is_identity() {
    let cred = sample();
    let bytes = cred.export().unwrap();
    assert_eq!(bytes[0], 1);
    let back = Credential::import(&bytes).unwrap();
    // millisecond precision survives
    assert_eq!(back.issued_at().timestamp_millis(), cred.issued_at().timestamp_millis());
    assert_eq!(back.token(), cred.token());
    assert_eq!(back.refresh_token(), cred.refresh_token());
    assert_eq!(back.account_id(), cred.account_id());
    assert_eq!(back.certificate(), cred.certificate());
    assert_eq!(back.refresh_due().map(|d| d.timestamp_millis()),
               cred.refresh_due().map(|d| d.timestamp_millis()));
}

#[test]
fn invalid_flag_survives_export() {
    let bytes = sample().invalidated().export().unwrap();
    assert!(!Credential::import(&bytes).unwrap().is_valid());
}

#[test]
fn import_rejects_bad_blobs() {
    assert!(Credential::import(&[]).is_err());
    assert!(Credential::import(&[2, 0]).is_err());
    assert!(matches!(Credential::import(&[1, 0xff]), Err(Error::Codec(_))));

    let mut bytes = sample().export().unwrap();
    bytes.truncate(bytes.len() - 1);
    assert!(Credential::import(&bytes).is_err());
}

#[test]
fn debug_never_shows_secrets() {
    let dbg = format!("{:?}", sample());
    assert!(!dbg.contains("secret"));
    assert!(!dbg.contains("cert\""));
    assert!(dbg.contains("u0123"));
}

#[test]
fn refresh_due_needs_a_lifetime() {
    assert!(Credential::new("t").refresh_due().is_none());
    let c = Credential::new("t").with_lifetime_secs(60);
    assert_eq!((c.refresh_due().unwrap() - c.issued_at()).num_seconds(), 60);
    assert!(Credential::new("t").with_lifetime_secs(i64::MAX).refresh_due().is_none());
}

// ── Account calls ─────────────────────────────────────────────────────────────

#[test]
fn profile_requires_an_account_id() {
    let p = Profile::from_struct(&Struct::new().with(1, "u9").with(20, "Bot")).unwrap();
    assert_eq!(p, Profile { account_id: "u9".into(), display_name: "Bot".into() });
    assert!(Profile::from_struct(&Struct::new()).is_err());
    assert_eq!(account::get_profile().method, method::GET_PROFILE);
}

#[test]
fn refresh_keeps_identity_and_rotates_tokens() {
    let prev = sample();
    let call = account::refresh(prev.refresh_token().unwrap());
    assert_eq!(call.method, method::REFRESH);
    assert_eq!(call.args.get_struct(1).unwrap().get_str(1), Some("secret-refresh"));

    let next = read_refresh(&prev, &Struct::new().with(1, "new-token").with(2, 600i64)).unwrap();
    assert_eq!(next.token(), "new-token");
    assert_eq!(next.refresh_token(), Some("secret-refresh"));
    assert_eq!(next.account_id(), Some("u0123"));
    assert_eq!(next.certificate(), Some("cert"));

    let rotated = read_refresh(&prev, &Struct::new().with(1, "t2").with(5, "r2")).unwrap();
    assert_eq!(rotated.refresh_token(), Some("r2"));
}

#[test]
fn refresh_without_token_fails() {
    assert!(read_refresh(&sample(), &Struct::new()).is_err());
}

#[test]
fn logout_call() {
    assert_eq!(account::logout().method, method::LOGOUT);
}

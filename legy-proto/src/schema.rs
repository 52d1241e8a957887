//! Method names and field ids.
//!
//! The remote schema is versioned outside our control. Every number the
//! protocol layer relies on lives here so a renumbering is a one-file change.

/// RPC method names.
pub mod method {
    pub const CREATE_SESSION: &str = "createSession";
    pub const CREATE_QR_CODE: &str = "createQrCode";
    pub const CHECK_QR_CODE_VERIFIED: &str = "checkQrCodeVerified";
    pub const VERIFY_CERTIFICATE: &str = "verifyCertificate";
    pub const CREATE_PIN_CODE: &str = "createPinCode";
    pub const CHECK_PIN_CODE_VERIFIED: &str = "checkPinCodeVerified";
    pub const QR_CODE_LOGIN_V2: &str = "qrCodeLoginV2";
    pub const GET_PROFILE: &str = "getProfile";
    pub const REFRESH: &str = "refresh";
    pub const LOGOUT: &str = "logoutZ";
    pub const GET_LAST_OP_REVISION: &str = "getLastOpRevision";
    pub const FETCH_OPS: &str = "fetchOps";
}

/// Pairing service requests wrap their arguments in this field.
pub const REQUEST: i16 = 1;

/// Fields of the pairing session and challenge calls.
pub mod pairing {
    /// `createSession` response / every later request: the pairing session id.
    pub const SESSION_ID: i16 = 1;
    /// `createQrCode` response: the callback URL to render.
    pub const CALLBACK_URL: i16 = 1;
    /// `checkQrCodeVerified` / `checkPinCodeVerified` response: optional
    /// explicit status.
    pub const STATUS: i16 = 1;
    /// `createPinCode` response: the PIN the approving device must enter.
    pub const PIN_CODE: i16 = 1;

    /// Values of [`STATUS`].
    pub mod status {
        pub const PENDING: i32 = 0;
        pub const APPROVED: i32 = 1;
        pub const DENIED: i32 = 2;
        pub const EXPIRED: i32 = 3;
    }

    /// `verifyCertificate` request fields.
    pub mod verify {
        pub const SESSION_ID: i16 = 1;
        pub const CERTIFICATE: i16 = 2;
    }

    /// `qrCodeLoginV2` request fields.
    pub mod login {
        pub const SESSION_ID: i16 = 1;
        pub const SYSTEM_NAME: i16 = 2;
        pub const MODEL_NAME: i16 = 3;
        pub const AUTO_LOGIN: i16 = 4;
    }

    /// `qrCodeLoginV2` response fields.
    pub mod login_response {
        pub const CERTIFICATE: i16 = 1;
        pub const ACCOUNT_ID: i16 = 4;
        /// X25519 public key of the approving device.
        pub const PEER_PUBLIC_KEY: i16 = 10;
        /// Compact-encoded [`super::token_info`] struct sealed under the
        /// agreed key as `nonce ‖ ciphertext ‖ tag`.
        pub const SEALED_TOKEN_INFO: i16 = 11;
    }

    /// Pairing exception codes.
    pub mod error {
        pub const VERIFICATION_FAILED: i32 = 2;
        pub const NOT_FOUND: i32 = 3;
        pub const RETRY_LATER: i32 = 4;
        pub const INVALID_CONTEXT: i32 = 100;
    }
}

/// Issued token bundle (pairing result and refresh result share the ids).
pub mod token_info {
    pub const ACCESS_TOKEN: i16 = 1;
    pub const REFRESH_TOKEN: i16 = 2;
    pub const DURATION_SECS: i16 = 3;
}

/// Token refresh response fields.
pub mod refresh_response {
    pub const ACCESS_TOKEN: i16 = 1;
    pub const DURATION_SECS: i16 = 2;
    pub const REFRESH_TOKEN: i16 = 5;
}

/// Service exception struct.
pub mod exception {
    pub const CODE: i16 = 1;
    pub const REASON: i16 = 2;
    pub const PARAMETERS: i16 = 3;
}

/// Profile fields used to validate a token.
pub mod profile {
    pub const ACCOUNT_ID: i16 = 1;
    pub const DISPLAY_NAME: i16 = 20;
}

/// `fetchOps` arguments.
pub mod fetch_ops {
    pub const LOCAL_REVISION: i16 = 2;
    pub const COUNT: i16 = 3;
    pub const GLOBAL_REVISION: i16 = 4;
    pub const INDIVIDUAL_REVISION: i16 = 5;
}

/// Operation fields.
pub mod operation {
    pub const REVISION: i16 = 1;
    pub const CREATED_TIME: i16 = 2;
    pub const KIND: i16 = 3;
    pub const REQ_SEQ: i16 = 4;
    pub const STATUS: i16 = 7;
    pub const PARAM1: i16 = 10;
    pub const PARAM2: i16 = 11;
    pub const PARAM3: i16 = 12;
    pub const MESSAGE: i16 = 20;
}

/// Message fields.
pub mod message {
    pub const FROM: i16 = 1;
    pub const TO: i16 = 2;
    pub const TO_TYPE: i16 = 3;
    pub const ID: i16 = 4;
    pub const CREATED_TIME: i16 = 5;
    pub const TEXT: i16 = 10;
    pub const CONTENT_TYPE: i16 = 15;
    pub const CONTENT_METADATA: i16 = 18;
}

/// Separator inside revision parameters of end-of-operation markers.
pub const REVISION_SEPARATOR: char = '\u{1e}';

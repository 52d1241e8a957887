//! Cryptographic primitives for device pairing.
//!
//! Provides:
//! - [`PairingKeyPair`]: ephemeral X25519 key pair
//! - [`SharedKey`]: `SHA-256` of the X25519 output, used as an AES-256-GCM key
//! - [`sha256!`] hash macro

#![deny(unsafe_code)]

#[macro_use]
mod sha;
mod pairing_key;

pub use pairing_key::{NONCE_LEN, PUBLIC_KEY_LEN, PairingKeyPair, SharedKey, TAG_LEN};

#[doc(hidden)]
pub use sha2 as __sha2;

/// Errors from key agreement and sealed-payload handling.
#[derive(Clone, Debug, PartialEq)]
pub enum CryptoError {
    /// The OS random number generator failed.
    Rng,
    /// The remote public key has the wrong length.
    InvalidPublicKey { len: usize },
    /// The remote public key is a low-order point.
    WeakPublicKey,
    /// Sealed buffer too short to hold a nonce and tag.
    InvalidBuffer,
    /// The AEAD tag did not verify.
    AuthenticationFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rng => write!(f, "random number generator failure"),
            Self::InvalidPublicKey { len } => write!(f, "public key is {len} bytes, expected 32"),
            Self::WeakPublicKey => write!(f, "public key is a low-order point"),
            Self::InvalidBuffer => write!(f, "sealed buffer too short"),
            Self::AuthenticationFailed => write!(f, "authentication tag mismatch"),
        }
    }
}
impl std::error::Error for CryptoError {}

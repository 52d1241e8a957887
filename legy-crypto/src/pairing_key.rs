//! Ephemeral X25519 key pair held for the lifetime of a pairing challenge.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// Length of an X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Length of the AES-GCM nonce prefixed to sealed payloads.
pub const NONCE_LEN: usize = 12;
/// Length of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// The local half of a pairing key exchange.
///
/// The public half travels inside the challenge URL; the secret half never
/// leaves this value and is wiped on drop.
pub struct PairingKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl PairingKeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).map_err(|_| CryptoError::Rng)?;
        let pair = Self::from_secret_bytes(seed);
        seed.zeroize();
        Ok(pair)
    }

    /// Rebuild a key pair from a raw 32-byte scalar.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The raw public key.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] { *self.public.as_bytes() }

    /// Combine with the remote public key: `SHA-256(X25519(secret, remote))`.
    ///
    /// Low-order remote points (which would force a predictable shared
    /// secret) are rejected.
    pub fn agree(&self, remote_public: &[u8]) -> Result<SharedKey, CryptoError> {
        let remote: [u8; PUBLIC_KEY_LEN] = remote_public
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey { len: remote_public.len() })?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(remote));
        if !shared.was_contributory() {
            return Err(CryptoError::WeakPublicKey);
        }
        Ok(SharedKey(sha256!(shared.as_bytes())))
    }
}

impl std::fmt::Debug for PairingKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let p = self.public.as_bytes();
        write!(f, "PairingKeyPair(public={:02x}{:02x}{:02x}{:02x}…)", p[0], p[1], p[2], p[3])
    }
}

// ─── SharedKey ────────────────────────────────────────────────────────────────

/// A 256-bit symmetric key agreed during pairing.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self { Self(bytes) }

    /// Encrypt to `nonce ‖ ciphertext ‖ tag` with a random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::Rng)?;
        let ct = self.cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend(ct);
        Ok(out)
    }

    /// Decrypt a `nonce ‖ ciphertext ‖ tag` buffer produced by [`SharedKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidBuffer);
        }
        let (nonce, ct) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

impl PartialEq for SharedKey {
    fn eq(&self, other: &Self) -> bool {
        // not constant-time; only used to compare two locally derived keys
        self.0 == other.0
    }
}

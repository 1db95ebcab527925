//! Symmetric key material, fingerprints and password-based derivation.

use std::time::{Duration, SystemTime};

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::types::{
    DEFAULT_TOKEN_LENGTH, FINGERPRINT_HEX_LENGTH, KEY_LENGTH, PBKDF2_ITERATIONS, SALT_LENGTH,
    SESSION_TOKEN_LENGTH,
};

/// A 256-bit symmetric key.
///
/// The raw bytes are wiped on drop. Logs and persisted records refer to a key
/// only through [`SymmetricKey::fingerprint`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_LENGTH];
        fill_random(&mut bytes)?;
        let key = Self(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Build a key from raw bytes. Fails unless exactly 32 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LENGTH,
                    got: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Parse the canonical 64-character hex form.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let trimmed = encoded.trim();
        if trimmed.len() != KEY_LENGTH * 2 {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LENGTH,
                got: trimmed.len() / 2,
            });
        }
        let bytes = Zeroizing::new(
            hex::decode(trimmed).map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Canonical hex form. The returned string is wiped on drop.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Short, non-reversible identifier: the first 16 hex chars of SHA-256(key).
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SymmetricKey")
            .field(&self.fingerprint())
            .finish()
    }
}

/// Fingerprint arbitrary key bytes (see [`SymmetricKey::fingerprint`]).
pub fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_HEX_LENGTH);
    hex
}

/// Generate `size_bytes` of cryptographically secure random key material.
pub fn generate_key(size_bytes: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut bytes = Zeroizing::new(vec![0u8; size_bytes]);
    fill_random(&mut bytes)?;
    Ok(bytes)
}

/// Random token rendered as lowercase hex (`len` random bytes, `2 * len` chars).
pub fn generate_secure_token(len: usize) -> Result<Zeroizing<String>, CryptoError> {
    let bytes = generate_key(len)?;
    Ok(Zeroizing::new(hex::encode(bytes.as_slice())))
}

/// Token of [`DEFAULT_TOKEN_LENGTH`] random bytes.
pub fn generate_default_token() -> Result<Zeroizing<String>, CryptoError> {
    generate_secure_token(DEFAULT_TOKEN_LENGTH)
}

/// Ephemeral key plus an opaque session token, valid until `expires_at`.
#[derive(Debug)]
pub struct SessionKey {
    pub key: SymmetricKey,
    pub token: Zeroizing<String>,
    pub expires_at: SystemTime,
}

impl SessionKey {
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// Fresh session key expiring `ttl` from now.
pub fn generate_session_key(ttl: Duration) -> Result<SessionKey, CryptoError> {
    Ok(SessionKey {
        key: SymmetricKey::generate()?,
        token: generate_secure_token(SESSION_TOKEN_LENGTH)?,
        expires_at: SystemTime::now() + ttl,
    })
}

pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|e| CryptoError::RngFailed(e.to_string()))
}

/// A key derived from a password, together with the salt needed to derive it again.
#[derive(Debug)]
pub struct DerivedKey {
    pub key: SymmetricKey,
    pub salt: Vec<u8>,
}

impl DerivedKey {
    pub fn salt_hex(&self) -> String {
        hex::encode(&self.salt)
    }
}

/// Derive a 256-bit key from a password with PBKDF2-HMAC-SHA256.
///
/// A random 128-bit salt is generated when `salt` is `None`. The same
/// password and salt always yield the same key.
pub fn derive_key_from_password(
    password: &str,
    salt: Option<&[u8]>,
) -> Result<DerivedKey, CryptoError> {
    let salt = match salt {
        Some(s) if s.len() < SALT_LENGTH => {
            return Err(CryptoError::InvalidSaltLength {
                min: SALT_LENGTH,
                got: s.len(),
            })
        }
        Some(s) => s.to_vec(),
        None => {
            let mut fresh = vec![0u8; SALT_LENGTH];
            fill_random(&mut fresh)?;
            fresh
        }
    };

    let mut out = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut out);
    let key = SymmetricKey::from_bytes(&out);
    out.zeroize();
    Ok(DerivedKey { key: key?, salt })
}

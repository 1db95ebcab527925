//! AES-256-GCM encryption for column values.
//!
//! Stored format (before base64):
//! [16 bytes: nonce][16 bytes: tag][N bytes: ciphertext]
//!
//! The 128-bit nonce is drawn fresh from the OS RNG on every call.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::encoding::{base64_decode, base64_encode};
use crate::error::CryptoError;
use crate::key::{fill_random, SymmetricKey};
use crate::types::{KEY_LENGTH, NONCE_LENGTH, TAG_LENGTH};

/// AES-256-GCM instantiated with a 128-bit nonce.
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// The output of one encrypt call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
    nonce: [u8; NONCE_LENGTH],
    tag: [u8; TAG_LENGTH],
    ciphertext: Vec<u8>,
}

impl EncryptedValue {
    pub fn nonce(&self) -> &[u8; NONCE_LENGTH] {
        &self.nonce
    }

    pub fn tag(&self) -> &[u8; TAG_LENGTH] {
        &self.tag
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Concatenated `[nonce][tag][ciphertext]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LENGTH + TAG_LENGTH + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split a concatenated blob. Anything shorter than nonce + tag is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let min_length = NONCE_LENGTH + TAG_LENGTH;
        if bytes.len() < min_length {
            return Err(CryptoError::MalformedCiphertext(format!(
                "expected at least {} bytes, got {}",
                min_length,
                bytes.len()
            )));
        }
        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&bytes[..NONCE_LENGTH]);
        let mut tag = [0u8; TAG_LENGTH];
        tag.copy_from_slice(&bytes[NONCE_LENGTH..min_length]);
        Ok(Self {
            nonce,
            tag,
            ciphertext: bytes[min_length..].to_vec(),
        })
    }

    /// External opaque form: standard base64 of [`EncryptedValue::to_bytes`].
    pub fn encode(&self) -> String {
        base64_encode(&self.to_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = base64_decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedCiphertext(format!("base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

/// Keyed AES-256-GCM instance, reusable across many values.
///
/// Bulk re-encryption builds one of these per key instead of re-running the
/// key schedule for every cell.
pub struct KeyCipher {
    cipher: Aes256Gcm128,
}

impl KeyCipher {
    pub fn new(key: &SymmetricKey) -> Self {
        Self {
            cipher: Aes256Gcm128::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Build from raw key bytes; fails unless exactly 32 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LENGTH,
                got: key.len(),
            });
        }
        let cipher = Aes256Gcm128::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8], aad: Option<&[u8]>) -> Result<EncryptedValue, CryptoError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        fill_random(&mut nonce)?;

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                aad.unwrap_or_default(),
                &mut buffer,
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut tag_bytes = [0u8; TAG_LENGTH];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok(EncryptedValue {
            nonce,
            tag: tag_bytes,
            ciphertext: buffer,
        })
    }

    /// Decrypt and authenticate. On tag mismatch nothing is returned.
    pub fn decrypt(
        &self,
        value: &EncryptedValue,
        aad: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let mut buffer = Zeroizing::new(value.ciphertext.clone());
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&value.nonce),
                aad.unwrap_or_default(),
                &mut buffer,
                GenericArray::from_slice(&value.tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(buffer)
    }

    /// Encrypt a UTF-8 string straight to the encoded external form.
    pub fn encrypt_str(&self, plaintext: &str, aad: Option<&[u8]>) -> Result<String, CryptoError> {
        Ok(self.encrypt(plaintext.as_bytes(), aad)?.encode())
    }

    /// Decode and decrypt an external value back to a UTF-8 string.
    pub fn decrypt_str(&self, encoded: &str, aad: Option<&[u8]>) -> Result<Zeroizing<String>, CryptoError> {
        let value = EncryptedValue::decode(encoded)?;
        let plaintext = self.decrypt(&value, aad)?;
        let text = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::InvalidUtf8)?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}

/// Encrypt with AES-256-GCM under a raw 32-byte key.
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8],
    aad: Option<&[u8]>,
) -> Result<EncryptedValue, CryptoError> {
    KeyCipher::from_slice(key)?.encrypt(plaintext, aad)
}

/// Decrypt with AES-256-GCM under a raw 32-byte key.
pub fn decrypt(
    value: &EncryptedValue,
    key: &[u8],
    aad: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    KeyCipher::from_slice(key)?.decrypt(value, aad)
}

/// Encrypt a string and return the encoded external form.
pub fn encrypt_to_string(
    plaintext: &str,
    key: &SymmetricKey,
    aad: Option<&[u8]>,
) -> Result<String, CryptoError> {
    KeyCipher::new(key).encrypt_str(plaintext, aad)
}

/// Decode and decrypt an external value to a string.
pub fn decrypt_from_string(
    encoded: &str,
    key: &SymmetricKey,
    aad: Option<&[u8]>,
) -> Result<Zeroizing<String>, CryptoError> {
    KeyCipher::new(key).decrypt_str(encoded, aad)
}

/// Associated data binding a ciphertext to the JSON object helpers.
const OBJECT_AAD: &[u8] = b"json-object";

/// Serialize `value` to JSON and encrypt it. Only [`decrypt_object`] can
/// open the result.
pub fn encrypt_object<T: Serialize + ?Sized>(value: &T, key: &SymmetricKey) -> Result<String, CryptoError> {
    let json = Zeroizing::new(
        serde_json::to_vec(value).map_err(|e| CryptoError::SerializationError(e.to_string()))?,
    );
    Ok(KeyCipher::new(key).encrypt(&json, Some(OBJECT_AAD))?.encode())
}

/// Decrypt a value from [`encrypt_object`] and parse it back.
pub fn decrypt_object<T: DeserializeOwned>(encoded: &str, key: &SymmetricKey) -> Result<T, CryptoError> {
    let value = EncryptedValue::decode(encoded)?;
    let json = KeyCipher::new(key).decrypt(&value, Some(OBJECT_AAD))?;
    serde_json::from_slice(&json).map_err(|e| CryptoError::SerializationError(e.to_string()))
}

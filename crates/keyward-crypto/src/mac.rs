//! Unkeyed hashing, salted hashing and keyed HMAC-SHA256.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;
use crate::key::fill_random;
use crate::types::SALT_LENGTH;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of `text`, lowercase hex.
pub fn hash(text: &str) -> String {
    hex::encode(hash_bytes(text.as_bytes()))
}

/// SHA-256 of raw bytes.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// A salted SHA-256 digest and the salt it was computed with, both hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltedHash {
    pub hash: String,
    pub salt: String,
}

/// SHA-256 of `text` followed by `salt`. A random [`SALT_LENGTH`]-byte salt
/// is drawn when none is given.
pub fn hash_with_salt(text: &str, salt: Option<&[u8]>) -> Result<SaltedHash, CryptoError> {
    let salt = match salt {
        Some(s) => s.to_vec(),
        None => {
            let mut fresh = vec![0u8; SALT_LENGTH];
            fill_random(&mut fresh)?;
            fresh
        }
    };
    let digest = Sha256::new()
        .chain_update(text.as_bytes())
        .chain_update(&salt)
        .finalize();
    Ok(SaltedHash {
        hash: hex::encode(digest),
        salt: hex::encode(salt),
    })
}

/// Check `text` against a hash from [`hash_with_salt`]. Constant-time in the
/// digest; malformed hex fails verification.
pub fn verify_hash_with_salt(text: &str, hash_hex: &str, salt_hex: &str) -> bool {
    let (Ok(expected), Ok(salt)) = (hex::decode(hash_hex), hex::decode(salt_hex)) else {
        return false;
    };
    let digest = Sha256::new()
        .chain_update(text.as_bytes())
        .chain_update(&salt)
        .finalize();
    digest.as_slice().ct_eq(&expected).into()
}

/// HMAC-SHA256 of `data` under `key`, lowercase hex.
pub fn sign(data: &[u8], key: &[u8]) -> String {
    let mut mac = new_mac(key);
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex MAC produced by [`sign`]. The tag comparison is constant-time;
/// malformed hex simply fails verification.
pub fn verify(data: &[u8], mac_hex: &str, key: &[u8]) -> bool {
    let Ok(expected) = hex::decode(mac_hex) else {
        return false;
    };
    let mut mac = new_mac(key);
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length")
}

//! Stateless cryptographic primitives for keyward.
//!
//! Nothing in this crate performs I/O; every function works over the bytes
//! it is given.

pub mod aes_gcm;
pub mod canonical;
pub mod encoding;
pub mod error;
pub mod hkdf;
pub mod key;
pub mod mac;
pub mod signing;
pub mod types;

pub use aes_gcm::{
    decrypt, decrypt_from_string, decrypt_object, encrypt, encrypt_object, encrypt_to_string,
    EncryptedValue, KeyCipher,
};
pub use canonical::canonical_json;
pub use error::CryptoError;
pub use hkdf::derive_subkey;
pub use key::{
    derive_key_from_password, fingerprint, generate_default_token, generate_key,
    generate_secure_token, generate_session_key, DerivedKey, SessionKey, SymmetricKey,
};
pub use mac::{hash, hash_bytes, hash_with_salt, sign, verify, verify_hash_with_salt, SaltedHash};
pub use signing::{generate_key_pair, AsymmetricKeyPair};
pub use types::{
    DEFAULT_SESSION_TTL, KEY_LENGTH, NONCE_LENGTH, PBKDF2_ITERATIONS, SALT_LENGTH, TAG_LENGTH,
};

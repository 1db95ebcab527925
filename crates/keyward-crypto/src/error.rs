use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Salt too short: need at least {min} bytes, got {got}")]
    InvalidSaltLength { min: usize, got: usize },

    #[error("Authentication failed: ciphertext, key or associated data do not match")]
    AuthenticationFailed,

    #[error("Malformed encrypted value: {0}")]
    MalformedCiphertext(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Plaintext is not valid UTF-8")]
    InvalidUtf8,

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("JWK missing {0}")]
    MissingJwkField(&'static str),

    #[error("Invalid JWK: {0}")]
    InvalidJwk(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("canonicalJSON: non-finite number is not representable in JSON")]
    NonFiniteNumber,

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}

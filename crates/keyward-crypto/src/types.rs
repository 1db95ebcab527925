/// Symmetric key length in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes. Column values use a 128-bit nonce rather than the
/// 96-bit GCM default so that the stored format is `[nonce:16][tag:16][ciphertext]`.
pub const NONCE_LENGTH: usize = 16;

/// AES-GCM tag length in bytes (128 bits).
pub const TAG_LENGTH: usize = 16;

/// Salt length for password-based key derivation (128 bits).
pub const SALT_LENGTH: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Number of hex characters of the key digest used as a fingerprint.
pub const FINGERPRINT_HEX_LENGTH: usize = 16;

/// Default secret material length in bytes (rendered as 128 hex chars).
pub const DEFAULT_TOKEN_LENGTH: usize = 64;

/// Random bytes in a session token (rendered as 64 hex chars).
pub const SESSION_TOKEN_LENGTH: usize = 32;

/// Session key lifetime when the caller has no preference.
pub const DEFAULT_SESSION_TTL: std::time::Duration = std::time::Duration::from_secs(3600);

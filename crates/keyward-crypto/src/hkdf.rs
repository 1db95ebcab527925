//! HKDF-SHA256 sub-key derivation.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::key::SymmetricKey;
use crate::types::KEY_LENGTH;

/// Derive a 256-bit sub-key from a master key.
///
/// # Arguments
/// * `master` - Input keying material
/// * `salt` - Salt for domain separation
/// * `info` - Context and application-specific info
pub fn derive_subkey(
    master: &SymmetricKey,
    salt: &[u8],
    info: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), master.as_bytes());
    let mut okm = zeroize::Zeroizing::new([0u8; KEY_LENGTH]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(format!("HKDF expand failed: {}", e)))?;
    SymmetricKey::from_bytes(&okm[..])
}

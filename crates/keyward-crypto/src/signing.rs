//! ECDSA P-256 key pairs.
//!
//! Not used by rotation or the audit chain; kept for callers that need an
//! asymmetric pair (e.g. issuing verifiable exports). Signatures are IEEE
//! P1363 (raw r||s, 64 bytes).

use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde_json::Value;
use zeroize::Zeroize;

use crate::encoding::{base64url_decode, base64url_encode};
use crate::error::CryptoError;

/// A freshly generated P-256 signing key and its public half.
pub struct AsymmetricKeyPair {
    signing_key: SigningKey,
}

impl AsymmetricKeyPair {
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as a JWK.
    pub fn public_key_jwk(&self) -> Result<Value, CryptoError> {
        export_public_key_jwk(self.verifying_key())
    }

    /// Private key as a JWK (includes `d`).
    pub fn private_key_jwk(&self) -> Result<Value, CryptoError> {
        export_private_key_jwk(&self.signing_key)
    }
}

/// Generate a new P-256 key pair.
pub fn generate_key_pair() -> AsymmetricKeyPair {
    AsymmetricKeyPair {
        signing_key: SigningKey::random(&mut p256::elliptic_curve::rand_core::OsRng),
    }
}

/// Sign a message with ECDSA P-256 + SHA-256.
pub fn sign_message(private_key: &SigningKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signature: Signature = private_key
        .try_sign(message)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(signature.to_bytes().to_vec())
}

/// Verify an ECDSA P-256 signature against a JWK public key.
///
/// Returns false for malformed keys or signatures rather than erroring.
pub fn verify_message(public_key_jwk: &Value, message: &[u8], signature_bytes: &[u8]) -> bool {
    (|| -> Result<bool, CryptoError> {
        let verifying_key = import_public_key_jwk(public_key_jwk)?;
        let signature = Signature::from_slice(signature_bytes)
            .map_err(|e| CryptoError::InvalidJwk(e.to_string()))?;
        Ok(verifying_key.verify(message, &signature).is_ok())
    })()
    .unwrap_or(false)
}

/// Import a P-256 public key from JWK format.
pub fn import_public_key_jwk(jwk: &Value) -> Result<VerifyingKey, CryptoError> {
    let x_bytes = jwk_coordinate(jwk, "x")?;
    let y_bytes = jwk_coordinate(jwk, "y")?;

    // SEC1 uncompressed point: 0x04 || x || y, coordinates left-padded to 32 bytes
    let mut uncompressed = Vec::with_capacity(1 + 32 + 32);
    uncompressed.push(0x04);
    for coord in [&x_bytes, &y_bytes] {
        if coord.len() > 32 {
            return Err(CryptoError::InvalidJwk("coordinate longer than 32 bytes".into()));
        }
        uncompressed.extend(std::iter::repeat(0u8).take(32 - coord.len()));
        uncompressed.extend_from_slice(coord);
    }

    VerifyingKey::from_sec1_bytes(&uncompressed)
        .map_err(|e| CryptoError::InvalidJwk(format!("P-256 point: {}", e)))
}

fn jwk_coordinate(jwk: &Value, field: &'static str) -> Result<Vec<u8>, CryptoError> {
    let encoded = jwk
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or(CryptoError::MissingJwkField(field))?;
    base64url_decode(encoded).map_err(|e| CryptoError::InvalidJwk(format!("{}: {}", field, e)))
}

/// Export a P-256 verifying key to JWK format.
pub fn export_public_key_jwk(key: &VerifyingKey) -> Result<Value, CryptoError> {
    let point = key.to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| CryptoError::InvalidJwk("identity point".into()))?;
    let y = point
        .y()
        .ok_or_else(|| CryptoError::InvalidJwk("identity point".into()))?;

    Ok(serde_json::json!({
        "kty": "EC",
        "crv": "P-256",
        "x": base64url_encode(x.as_slice()),
        "y": base64url_encode(y.as_slice()),
    }))
}

/// Export a P-256 signing key (private) to JWK format.
pub fn export_private_key_jwk(key: &SigningKey) -> Result<Value, CryptoError> {
    let mut jwk = export_public_key_jwk(key.verifying_key())?;
    let mut scalar_bytes = key.to_bytes().to_vec();
    let d = base64url_encode(&scalar_bytes);
    scalar_bytes.zeroize();
    jwk["d"] = Value::String(d);
    Ok(jwk)
}

/// Import a P-256 private key from JWK format.
pub fn import_private_key_jwk(jwk: &Value) -> Result<SigningKey, CryptoError> {
    let mut d_bytes = jwk_coordinate(jwk, "d")?;
    if d_bytes.len() != 32 {
        d_bytes.zeroize();
        return Err(CryptoError::InvalidJwk("d must be 32 bytes".into()));
    }
    let key = SigningKey::from_bytes(d_bytes.as_slice().into())
        .map_err(|e| CryptoError::InvalidJwk(format!("P-256 scalar: {}", e)));
    d_bytes.zeroize();
    key
}

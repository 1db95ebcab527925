use base64ct::{Base64, Base64UrlUnpadded, Encoding};

/// Standard base64 (with padding), the external form of encrypted values.
pub fn base64_encode(data: &[u8]) -> String {
    Base64::encode_string(data)
}

/// Decode standard base64 (with padding).
pub fn base64_decode(s: &str) -> Result<Vec<u8>, base64ct::Error> {
    Base64::decode_vec(s)
}

/// Base64url encode bytes without padding (JWK coordinates).
pub fn base64url_encode(data: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(data)
}

/// Base64url decode a string to bytes.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, base64ct::Error> {
    Base64UrlUnpadded::decode_vec(s)
}

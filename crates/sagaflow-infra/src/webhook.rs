//! Internal-endpoint authentication.
//!
//! The step and relay endpoints are reachable only with the shared internal
//! key, and external callbacks can carry an HMAC-SHA256 body signature.
//! All comparisons are constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Authentication failures for internal endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("internal key verification failed")]
    KeyVerificationFailed,

    #[error("HMAC signature verification failed")]
    HmacVerificationFailed,

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),

    #[error("missing authentication: {0}")]
    MissingAuth(String),
}

/// Verify the shared internal key using constant-time comparison.
pub fn verify_internal_key(expected: &str, provided: &str) -> Result<(), AuthError> {
    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::KeyVerificationFailed)
    }
}

/// Verify an HMAC-SHA256 signature over a request body.
///
/// Accepts plain hex or the GitHub-style `sha256=<hex>` prefix.
pub fn verify_hmac_sha256(
    secret: &[u8],
    body: &[u8],
    signature: &str,
) -> Result<(), AuthError> {
    let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected_bytes =
        hex_decode(hex_sig).map_err(|_| AuthError::HmacVerificationFailed)?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
    mac.update(body);

    // Constant-time verification via the hmac crate.
    mac.verify_slice(&expected_bytes)
        .map_err(|_| AuthError::HmacVerificationFailed)
}

/// Compute the hex HMAC-SHA256 signature for a body, for outbound callbacks.
pub fn sign_hmac_sha256(secret: &[u8], body: &[u8]) -> Result<String, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_key_match() {
        assert!(verify_internal_key("secret", "secret").is_ok());
        assert!(verify_internal_key("secret", "Secret").is_err());
        assert!(verify_internal_key("secret", "secret2").is_err());
        assert!(verify_internal_key("secret", "").is_err());
    }

    #[test]
    fn test_hmac_sign_and_verify_roundtrip() {
        let secret = b"shared-secret";
        let body = br#"{"executionId":"abc","stepIndex":0}"#;

        let sig = sign_hmac_sha256(secret, body).unwrap();
        assert!(verify_hmac_sha256(secret, body, &sig).is_ok());
        assert!(verify_hmac_sha256(secret, body, &format!("sha256={sig}")).is_ok());
    }

    #[test]
    fn test_hmac_rejects_tampered_body() {
        let secret = b"shared-secret";
        let sig = sign_hmac_sha256(secret, b"original").unwrap();
        assert!(verify_hmac_sha256(secret, b"tampered", &sig).is_err());
    }

    #[test]
    fn test_hmac_rejects_wrong_secret() {
        let sig = sign_hmac_sha256(b"secret-a", b"body").unwrap();
        assert!(verify_hmac_sha256(b"secret-b", b"body", &sig).is_err());
    }

    #[test]
    fn test_hmac_rejects_garbage_signature() {
        assert!(verify_hmac_sha256(b"secret", b"body", "not-hex").is_err());
        assert!(verify_hmac_sha256(b"secret", b"body", "abc").is_err());
    }
}

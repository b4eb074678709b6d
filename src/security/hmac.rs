//! HMAC-SHA256 signature and timestamp validation for inbound webhooks
//!
//! Signatures are hex digests over the raw request body, optionally prefixed
//! with `sha256=`. Comparison runs in constant time.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest length in bytes
const DIGEST_LEN: usize = 32;

/// Validation failure reasons, ordered by the fail-fast checks in [`validate`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("Missing payload")]
    MissingPayload,

    #[error("Missing signature")]
    MissingSignature,

    #[error("Missing timestamp")]
    MissingTimestamp,

    #[error("Missing secret")]
    MissingSecret,

    #[error("Request timestamp too old or invalid")]
    StaleTimestamp,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// Generate the signature for a payload
/// Format: sha256=<64-char-hex>
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify an HMAC-SHA256 signature against the raw payload
///
/// Accepts the hex digest with or without the `sha256=` prefix. Malformed
/// hex and wrong-length digests are rejected before any byte comparison;
/// the comparison itself is constant-time.
pub fn verify(payload: &[u8], signature: &str, secret: &str) -> bool {
    if payload.is_empty() || signature.is_empty() || secret.is_empty() {
        return false;
    }

    let received = signature.strip_prefix("sha256=").unwrap_or(signature);

    // Length alone only reveals that a fixed-length digest is malformed
    let received_bytes = match hex::decode(received) {
        Ok(bytes) if bytes.len() == DIGEST_LEN => bytes,
        _ => return false,
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);

    // verify_slice compares in constant time
    mac.verify_slice(&received_bytes).is_ok()
}

/// Verify that a webhook timestamp is within the tolerance window
///
/// The timestamp is Unix seconds as an integer or numeric string. Both
/// too-old and too-far-in-future values are rejected.
pub fn verify_timestamp(timestamp: &str, tolerance_secs: i64) -> bool {
    let request_time: i64 = match timestamp.trim().parse() {
        Ok(t) => t,
        Err(_) => return false,
    };

    if request_time == 0 {
        return false;
    }

    let current_time = Utc::now().timestamp();
    (current_time - request_time).abs() <= tolerance_secs
}

/// Complete webhook security validation
///
/// Missing-input checks run first, then the timestamp check, then the
/// signature check, so cryptographic work happens last.
pub fn validate(
    payload: &[u8],
    signature: Option<&str>,
    timestamp: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), SecurityError> {
    if payload.is_empty() {
        return Err(SecurityError::MissingPayload);
    }

    let signature = match signature {
        Some(s) if !s.is_empty() => s,
        _ => return Err(SecurityError::MissingSignature),
    };

    let timestamp = match timestamp {
        Some(t) if !t.is_empty() => t,
        _ => return Err(SecurityError::MissingTimestamp),
    };

    if secret.is_empty() {
        return Err(SecurityError::MissingSecret);
    }

    if !verify_timestamp(timestamp, tolerance_secs) {
        return Err(SecurityError::StaleTimestamp);
    }

    if !verify(payload, signature, secret) {
        return Err(SecurityError::InvalidSignature);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-webhook-secret-at-least-32-chars!!";

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let payload = br#"{"userId":"u1","action":"get_tasks"}"#;
        let signature = sign(payload, SECRET);

        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), 7 + 64);
        assert!(verify(payload, &signature, SECRET));
    }

    #[test]
    fn test_verify_without_prefix() {
        let payload = b"payload";
        let signature = sign(payload, SECRET);
        let bare = signature.strip_prefix("sha256=").unwrap();

        assert!(verify(payload, bare, SECRET));
    }

    #[test]
    fn test_verify_wrong_secret() {
        let payload = b"payload";
        let signature = sign(payload, SECRET);

        assert!(!verify(payload, &signature, "another-secret-also-32-chars-long!!!"));
    }

    #[test]
    fn test_verify_tampered_payload() {
        let signature = sign(b"payload", SECRET);
        assert!(!verify(b"payload2", &signature, SECRET));
    }

    #[test]
    fn test_verify_short_signature_rejected() {
        // Too-short digests must be rejected before comparison
        assert!(!verify(b"payload", "sha256=abcd", SECRET));
        assert!(!verify(b"payload", "abcd", SECRET));
    }

    #[test]
    fn test_verify_malformed_hex_rejected() {
        let bad = format!("sha256={}", "zz".repeat(32));
        assert!(!verify(b"payload", &bad, SECRET));
    }

    #[test]
    fn test_verify_empty_inputs() {
        let signature = sign(b"payload", SECRET);
        assert!(!verify(b"", &signature, SECRET));
        assert!(!verify(b"payload", "", SECRET));
        assert!(!verify(b"payload", &signature, ""));
    }

    #[test]
    fn test_timestamp_within_tolerance() {
        let now = Utc::now().timestamp();
        assert!(verify_timestamp(&now.to_string(), 300));
        assert!(verify_timestamp(&(now - 200).to_string(), 300));
        assert!(verify_timestamp(&(now + 200).to_string(), 300));
    }

    #[test]
    fn test_timestamp_outside_tolerance_symmetric() {
        let now = Utc::now().timestamp();
        assert!(!verify_timestamp(&(now - 301).to_string(), 300));
        assert!(!verify_timestamp(&(now + 301).to_string(), 300));
    }

    #[test]
    fn test_timestamp_invalid_values() {
        assert!(!verify_timestamp("not-a-number", 300));
        assert!(!verify_timestamp("", 300));
        assert!(!verify_timestamp("0", 300));
    }

    #[test]
    fn test_validate_fail_fast_ordering() {
        let now = Utc::now().timestamp().to_string();
        let signature = sign(b"payload", SECRET);

        assert_eq!(
            validate(b"", Some(&signature), Some(&now), SECRET, 300),
            Err(SecurityError::MissingPayload)
        );
        assert_eq!(
            validate(b"payload", None, Some(&now), SECRET, 300),
            Err(SecurityError::MissingSignature)
        );
        assert_eq!(
            validate(b"payload", Some(&signature), None, SECRET, 300),
            Err(SecurityError::MissingTimestamp)
        );
        assert_eq!(
            validate(b"payload", Some(&signature), Some(&now), "", 300),
            Err(SecurityError::MissingSecret)
        );
    }

    #[test]
    fn test_validate_checks_timestamp_before_signature() {
        let stale = (Utc::now().timestamp() - 9999).to_string();

        // 签名无效 + 时间戳过期：先报时间戳错误
        assert_eq!(
            validate(b"payload", Some("sha256=bogus"), Some(&stale), SECRET, 300),
            Err(SecurityError::StaleTimestamp)
        );
    }

    #[test]
    fn test_validate_success() {
        let now = Utc::now().timestamp().to_string();
        let signature = sign(b"payload", SECRET);

        assert_eq!(
            validate(b"payload", Some(&signature), Some(&now), SECRET, 300),
            Ok(())
        );
    }

    #[test]
    fn test_validate_invalid_signature() {
        let now = Utc::now().timestamp().to_string();
        let wrong = sign(b"other", SECRET);

        assert_eq!(
            validate(b"payload", Some(&wrong), Some(&now), SECRET, 300),
            Err(SecurityError::InvalidSignature)
        );
    }
}

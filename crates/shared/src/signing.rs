//! HMAC-SHA256 webhook payload signing.
//!
//! The signed content is `"{timestamp}.{payload}"` where `timestamp` is the
//! unix time in seconds sent alongside in the timestamp header. Binding the
//! timestamp into the MAC lets receivers reject replays outside a tolerance
//! window, and binding the exact body bytes detects tampering.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header carrying the unix timestamp (seconds) that was signed.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Version tag prefixed to the hex digest in the signature header.
pub const SIGNATURE_VERSION: &str = "v1";

/// Errors returned when verifying a received signature.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    MalformedHeader,

    #[error("Unsupported signature version: {0}")]
    UnsupportedVersion(String),

    #[error("Timestamp outside tolerance window")]
    TimestampOutOfTolerance,

    #[error("Signature mismatch")]
    Mismatch,
}

fn mac_for(secret: &str, payload: &[u8], timestamp: i64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Computes the signature header value for a payload.
///
/// Deterministic: the same `(secret, payload, timestamp)` always yields the
/// same value.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let digest = mac_for(secret, payload, timestamp).finalize().into_bytes();
    format!("{}={}", SIGNATURE_VERSION, hex::encode(digest))
}

/// Verifies a received signature header in constant time.
///
/// `now` and `tolerance_secs` bound how old (or how far in the future) the
/// signed timestamp may be.
pub fn verify(
    secret: &str,
    payload: &[u8],
    timestamp: i64,
    header_value: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let (version, digest_hex) = header_value
        .split_once('=')
        .ok_or(SignatureError::MalformedHeader)?;

    if version != SIGNATURE_VERSION {
        return Err(SignatureError::UnsupportedVersion(version.to_string()));
    }

    if (now - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let digest = hex::decode(digest_hex).map_err(|_| SignatureError::MalformedHeader)?;

    mac_for(secret, payload, timestamp)
        .verify_slice(&digest)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &[u8] = br#"{"type":"order.placed","id":"ord_1"}"#;

    #[test]
    fn test_sign_is_deterministic() {
        assert_eq!(
            sign(SECRET, PAYLOAD, 1_700_000_000),
            sign(SECRET, PAYLOAD, 1_700_000_000)
        );
    }

    #[test]
    fn test_sign_format() {
        let signature = sign(SECRET, PAYLOAD, 1_700_000_000);
        assert!(signature.starts_with("v1="));
        // SHA256 produces 32 bytes = 64 hex chars
        assert_eq!(signature.len(), 3 + 64);
    }

    #[test]
    fn test_sign_binds_timestamp_and_payload() {
        let base = sign(SECRET, PAYLOAD, 1_700_000_000);
        assert_ne!(base, sign(SECRET, PAYLOAD, 1_700_000_001));
        assert_ne!(base, sign(SECRET, b"{}", 1_700_000_000));
        assert_ne!(base, sign("whsec_other", PAYLOAD, 1_700_000_000));
    }

    #[test]
    fn test_sign_matches_manual_hmac() {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(b"1700000000.");
        mac.update(PAYLOAD);
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(sign(SECRET, PAYLOAD, 1_700_000_000), format!("v1={}", expected));
    }

    #[test]
    fn test_verify_roundtrip() {
        let header = sign(SECRET, PAYLOAD, 1_700_000_000);
        assert_eq!(
            verify(SECRET, PAYLOAD, 1_700_000_000, &header, 1_700_000_010, 300),
            Ok(())
        );
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let header = sign(SECRET, PAYLOAD, 1_700_000_000);
        assert_eq!(
            verify(SECRET, b"{}", 1_700_000_000, &header, 1_700_000_000, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let header = sign(SECRET, PAYLOAD, 1_700_000_000);
        assert_eq!(
            verify(SECRET, PAYLOAD, 1_700_000_000, &header, 1_700_000_301, 300),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn test_verify_rejects_malformed_header() {
        assert_eq!(
            verify(SECRET, PAYLOAD, 0, "nonsense", 0, 300),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify(SECRET, PAYLOAD, 0, "v1=zz", 0, 300),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify(SECRET, PAYLOAD, 0, "v0=abcd", 0, 300),
            Err(SignatureError::UnsupportedVersion("v0".to_string()))
        );
    }
}

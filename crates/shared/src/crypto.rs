//! Cryptographic utilities for payload hashing, secret generation and
//! idempotency keys.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix carried by every generated endpoint signing secret.
pub const SECRET_PREFIX: &str = "whsec_";

/// Number of random bytes in a signing secret.
pub const SECRET_BYTES: usize = 32;

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Generates a new opaque endpoint signing secret.
///
/// 32 bytes from the OS-seeded thread RNG, hex encoded behind `whsec_`.
pub fn generate_signing_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", SECRET_PREFIX, hex::encode(bytes))
}

/// Derives the idempotency key for one (event, endpoint) pair.
///
/// The same event type, source event id and endpoint id always map to the
/// same key, so a re-emitted event can never create a second delivery.
pub fn idempotency_key(event_type: &str, source_event_id: &str, endpoint_id: &uuid::Uuid) -> String {
    // Length-prefix the free-form parts so "a:b" + "c" never collides with "a" + "b:c".
    let material = format!(
        "{}:{}|{}:{}|{}",
        event_type.len(),
        event_type,
        source_event_id.len(),
        source_event_id,
        endpoint_id
    );
    sha256_hex(material.as_bytes())
}

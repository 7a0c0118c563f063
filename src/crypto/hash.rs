//! Hashing and message authentication.
//!
//! The reader wire signature is HMAC-SHA256 over the canonical message
//! `tag_hash || reader_id || decimal_timestamp || nonce` (UTF-8 concatenation,
//! no separators). The canonical form is independent of any serializer
//! ordering so firmware and backend agree byte-for-byte.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::domain::Hash256;

type HmacSha256 = Hmac<Sha256>;

/// Hash raw bytes with SHA-256.
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash raw bytes with SHA-256, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Canonical signature message for a toll event.
pub fn signature_message(tag_hash: &str, reader_id: &str, timestamp: i64, nonce: &str) -> String {
    format!("{tag_hash}{reader_id}{timestamp}{nonce}")
}

/// HMAC-SHA256 over `message`, hex-encoded.
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice only fails for
    // zero-capacity variants that Hmac<Sha256> does not have.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality over byte slices of equal length.
///
/// Slices of different lengths compare unequal without leaking where they
/// differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Constant-time equality for strings (signatures, admin keys).
pub fn constant_time_eq_str(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Generate a random hex nonce (server challenges).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random reader secret.
pub fn generate_secret() -> Vec<u8> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA256("abc")
        let digest = sha256_hex(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn signature_message_is_plain_concatenation() {
        let msg = signature_message("ab12", "R1", 1700000000, "n-1");
        assert_eq!(msg, "ab12R11700000000n-1");
    }

    #[test]
    fn hmac_roundtrip_with_same_secret() {
        let secret = b"reader_secret_01";
        let msg = signature_message("deadbeef", "READER_01", 1700000000, "nonce1");
        let sig1 = hmac_sha256_hex(secret, msg.as_bytes());
        let sig2 = hmac_sha256_hex(secret, msg.as_bytes());
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);

        let other = hmac_sha256_hex(b"other_secret", msg.as_bytes());
        assert_ne!(sig1, other);
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"different"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq_str("key", "key"));
        assert!(!constant_time_eq_str("key", "kex"));
    }

    #[test]
    fn nonces_are_unique_and_hex() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

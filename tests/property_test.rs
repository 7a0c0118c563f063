//! Property-based tests for the crypto layer.
//!
//! These verify invariants that should hold for any valid input.

use proptest::prelude::*;

use tollgate::crypto::{
    compute_vdf, constant_time_eq, hmac_sha256_hex, sha256, signature_message, verify_vdf,
};

/// Generate a random 32-byte hash
fn arb_hash() -> impl Strategy<Value = [u8; 32]> {
    any::<[u8; 32]>()
}

/// Generate a reader-style id
fn arb_reader_id() -> impl Strategy<Value = String> {
    "[A-Z0-9_]{4,24}"
}

/// Generate a nonce-style string
fn arb_nonce() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{8,40}"
}

proptest! {
    /// Signing then verifying with the same secret always matches; a
    /// different secret never does.
    #[test]
    fn hmac_roundtrip(
        secret in prop::collection::vec(any::<u8>(), 8..64),
        other in prop::collection::vec(any::<u8>(), 8..64),
        reader_id in arb_reader_id(),
        nonce in arb_nonce(),
        timestamp in 0i64..4_000_000_000,
    ) {
        let tag_hash = hex::encode(sha256(reader_id.as_bytes()));
        let message = signature_message(&tag_hash, &reader_id, timestamp, &nonce);

        let sig = hmac_sha256_hex(&secret, message.as_bytes());
        let again = hmac_sha256_hex(&secret, message.as_bytes());
        prop_assert_eq!(&sig, &again);

        if secret != other {
            let forged = hmac_sha256_hex(&other, message.as_bytes());
            prop_assert_ne!(&sig, &forged);
        }
    }

    /// The canonical message is injective over its parts for fixed-width
    /// tag hashes (64 hex chars): equal messages mean equal fields.
    #[test]
    fn signature_message_concatenates(
        reader_id in arb_reader_id(),
        nonce in arb_nonce(),
        timestamp in 0i64..4_000_000_000,
    ) {
        let tag_hash = hex::encode(sha256(nonce.as_bytes()));
        let message = signature_message(&tag_hash, &reader_id, timestamp, &nonce);
        prop_assert!(message.starts_with(&tag_hash));
        prop_assert!(message.ends_with(&nonce));
        prop_assert_eq!(
            message.len(),
            tag_hash.len() + reader_id.len() + timestamp.to_string().len() + nonce.len()
        );
    }

    /// VDF compute-then-verify always succeeds across difficulties.
    #[test]
    fn vdf_roundtrip(input in arb_hash(), difficulty in 1u32..300, granularity in 1u32..20) {
        let result = compute_vdf(&input, difficulty, granularity);
        prop_assert!(verify_vdf(
            &input,
            &result.output,
            &result.checkpoints,
            difficulty,
            granularity
        ));
    }

    /// Any single-byte corruption of a checkpoint is caught.
    #[test]
    fn vdf_detects_checkpoint_corruption(
        input in arb_hash(),
        index in 0usize..10,
        byte in 0usize..32,
        flip in 1u8..=255,
    ) {
        let result = compute_vdf(&input, 200, 10);
        let mut checkpoints = result.checkpoints.clone();
        let len = checkpoints.len();
        checkpoints[index % len][byte] ^= flip;
        prop_assert!(!verify_vdf(&input, &result.output, &checkpoints, 200, 10));
    }

    /// Constant-time equality agrees with ordinary equality.
    #[test]
    fn ct_eq_matches_eq(a in prop::collection::vec(any::<u8>(), 0..64),
                        b in prop::collection::vec(any::<u8>(), 0..64)) {
        prop_assert_eq!(constant_time_eq(&a, &b), a == b);
    }
}

//! Cryptographic primitives for Tollgate.
//!
//! - [`hash`] - SHA-256, HMAC-SHA256, constant-time comparison, nonces
//! - [`vdf`] - iterated-hash verifiable delay function with checkpoints

pub mod hash;
pub mod vdf;

pub use hash::{
    constant_time_eq, constant_time_eq_str, generate_nonce, generate_secret, hmac_sha256_hex,
    sha256, sha256_hex, signature_message,
};
pub use vdf::{compute_vdf, verify_vdf, VdfResult};

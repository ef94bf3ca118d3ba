//! Utility functions and helpers
//!
//! Hashing, ECDSA signing/verification, timestamps and the canonical JSON encoding
//! that block hashes are computed over.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, sha256_digest, sha256_hex, verify_hex_signature,
};

pub use serialization::canonical_json;

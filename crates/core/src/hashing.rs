//! SHA-256 content hashing utilities.
//!
//! The artifact store keys deduplication on [`sha256_hex`]; the short
//! form is used to disambiguate colliding file names.

use sha2::{Digest, Sha256};

/// Number of hex characters in a short hash fragment.
pub const SHORT_HASH_LEN: usize = 8;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// First [`SHORT_HASH_LEN`] characters of a full hex digest.
///
/// Panics if `hex` is shorter than the fragment; callers always pass a
/// full 64-character digest.
pub fn short_hash(hex: &str) -> &str {
    &hex[..SHORT_HASH_LEN]
}

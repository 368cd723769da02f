//! Integrity: whole-file SHA-256 used as file ID and checked on finalize.

use sha2::{Digest, Sha256};

/// Default maximum integrity failures before a transfer is abandoned.
pub const DEFAULT_MAX_INTEGRITY_FAILURES: u32 = 3;

/// Hash file content. Returns 32-byte digest.
pub fn hash_content(content: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().into()
}

/// Verify assembled content against expected hash.
pub fn verify_content(content: &[u8], expected_hash: &[u8; 32]) -> bool {
    hash_content(content) == *expected_hash
}

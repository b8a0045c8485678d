//! Content addressing for stored artifacts

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Algorithm prefix carried by every digest this registry produces.
pub const SHA256_PREFIX: &str = "sha256:";

/// Compute the `sha256:<hex>` digest of some bytes.
pub fn digest(content: &[u8]) -> String {
    format!("{SHA256_PREFIX}{}", hex::encode(Sha256::digest(content)))
}

/// Serialize a value to its canonical compact JSON form and compute its digest.
///
/// Returns the digest together with the exact bytes that were hashed, so the
/// caller can record their length as the descriptor size.
pub fn digest_json<T: Serialize>(value: &T) -> Result<(String, Vec<u8>), serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok((digest(&bytes), bytes))
}

/// True when a reference looks like a digest rather than a tag.
pub fn is_digest_reference(reference: &str) -> bool {
    reference.starts_with(SHA256_PREFIX)
}

/// True when a digest is `sha256:` followed by exactly 64 lowercase hex characters.
pub fn is_well_formed(digest: &str) -> bool {
    digest
        .strip_prefix(SHA256_PREFIX)
        .is_some_and(|hex| {
            hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}

//! Fingerprint hashing for cache keys.

use sha2::{Digest, Sha256};

/// Compute the cache key for a normalized query.
///
/// Keywords are expected to be normalized already; they are joined with a
/// unit separator so `["a b"]` and `["a", "b"]` hash differently.
pub fn fingerprint_hash(kind: &str, keywords: &[String], geo: &str, timeframe: &str, locale: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\n");
    hasher.update(keywords.join("\u{1f}").as_bytes());
    hasher.update(b"\n");
    hasher.update(geo.as_bytes());
    hasher.update(b"\n");
    hasher.update(timeframe.as_bytes());
    hasher.update(b"\n");
    hasher.update(locale.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `hash` looks like a value produced by [`fingerprint_hash`].
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

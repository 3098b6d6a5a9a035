//! Stable hashing for schema strings and member search keys.
//!
//! Hashes must be reproducible across builds and platforms because two
//! independently compiled schema graphs are compared by them, so everything
//! here goes through a fixed-seed XxHash64 over raw bytes rather than `std`'s
//! randomized hasher.

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Hashes a schema string (type name, declarator or bare identifier).
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

/// Hashes a `str`.
#[inline]
pub fn hash_str(s: &str) -> u64 {
    hash_bytes(s.as_bytes())
}

/// Folds `value` into an existing key.
pub fn fold(key: u64, value: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(key);
    hasher.write(&value.to_le_bytes());
    hasher.finish()
}

/// Folds several values into `key`, left to right.
pub fn fold_all(key: u64, values: &[u64]) -> u64 {
    values.iter().fold(key, |acc, v| fold(acc, *v))
}

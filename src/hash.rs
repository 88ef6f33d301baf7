//! Deterministic hashing: lock keys, stable ids, and schema fingerprints.
//!
//! Ids and lock keys are 64-bit xxHash values over a fixed seed, so the same
//! input produces the same key in every process. Fingerprints are SHA-256 hex
//! digests over a JSON rendering of a column layout.

use sha2::{Digest, Sha256};
use xxhash_rust::xxh64;

use crate::catalog::Column;

/// Fixed seed for every xxHash in the crate.
const SEED: u64 = 0x517cc1b727220a95;

/// Join parts with the ASCII record separator and hash the result.
///
/// The separator keeps `["ab", "c"]` and `["a", "bc"]` distinct.
pub fn hash_multi(parts: &[&str]) -> u64 {
    let mut combined = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            combined.push('\x1E');
        }
        combined.push_str(part);
    }
    xxh64::xxh64(combined.as_bytes(), SEED)
}

/// Stable identifier for a table or column, as 16 lowercase hex digits.
pub fn stable_id(parts: &[&str]) -> String {
    format!("{:016x}", hash_multi(parts))
}

/// Advisory-lock style key for a named lock on a table.
///
/// Table names are case-insensitive, so the key is computed over the
/// lowercased qualified name.
pub fn lock_key(qualified_table: &str, lock_name: &str) -> i64 {
    hash_multi(&[&qualified_table.to_lowercase(), lock_name]) as i64
}

/// SHA-256 fingerprint over a column layout (name, type, aggregate, time
/// bucket, visibility, in order).
pub fn schema_fingerprint(columns: &[Column]) -> String {
    let entries: Vec<serde_json::Value> = columns
        .iter()
        .enumerate()
        .map(|(ordinal, c)| {
            serde_json::json!({
                "name": c.name,
                "type": c.data_type.canonical_name(),
                "aggregate": c.aggregate.as_str(),
                "time_bucket": c.time_bucket.as_ref().map(|g| g.label()),
                "invisible": c.invisible,
                "ordinal": ordinal,
            })
        })
        .collect();
    let json_str = serde_json::Value::Array(entries).to_string();

    let mut hasher = Sha256::new();
    hasher.update(json_str.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

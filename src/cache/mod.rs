//! Persistent, content-addressed artifact cache.
//!
//! Artifacts are stored under `<kind>-<DiagramKey>` with one `ts-<DiagramKey>`
//! last-access record per diagram. Eviction works off that single timestamp
//! and removes every kind for the key together.

mod schema;
mod sqlite;

pub use sqlite::ArtifactCache;

use crate::types::{ArtifactKind, DiagramKey};

/// Prefix of the per-diagram last-access record.
pub(crate) const TIMESTAMP_PREFIX: &str = "ts-";

/// Suffixes used by the pre-partitioning flat layout.
const LEGACY_SUFFIXES: [&str; 4] = ["-map", "-png", "-svg", "ascii"];

/// Outcome of an eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Timestamp records inspected.
    pub scanned: usize,
    /// Diagram keys whose artifacts were deleted.
    pub evicted: usize,
}

/// Storage key for an artifact.
pub(crate) fn artifact_key(kind: ArtifactKind, key: &DiagramKey) -> String {
    format!("{}-{}", kind.cache_prefix(), key.as_str())
}

/// Storage key for a diagram's last-access record.
pub(crate) fn timestamp_key(key: &DiagramKey) -> String {
    format!("{TIMESTAMP_PREFIX}{}", key.as_str())
}

fn has_partition_prefix(storage_key: &str) -> bool {
    storage_key.starts_with(TIMESTAMP_PREFIX)
        || ArtifactKind::ALL
            .iter()
            .any(|kind| storage_key.starts_with(&format!("{}-", kind.cache_prefix())))
}

/// Whether `storage_key` belongs to the flat layout written by old versions.
pub(crate) fn is_legacy_key(storage_key: &str) -> bool {
    !has_partition_prefix(storage_key)
        && LEGACY_SUFFIXES
            .iter()
            .any(|suffix| storage_key.ends_with(suffix))
}

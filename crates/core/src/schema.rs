//! Schema snapshots — content-addressed column lists.
//!
//! A snapshot is the ordered column list of a table at a point in time,
//! identified by a SHA-256 hash over its canonical serialization. Equal
//! column lists always hash equal, so drift detection is a string compare.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One column as reported by the warehouse catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// 1-based position in the table definition.
    pub ordinal: u32,
}

/// Append-only record of a table's schema at `captured_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub id: i64,
    pub table_id: i64,
    pub columns: Vec<ColumnDef>,
    pub snapshot_hash: String,
    pub captured_at: DateTime<Utc>,
}

/// SHA-256 hex digest over the canonical serialization of a column list.
///
/// Canonical form: columns sorted by ordinal, each rendered as
/// `name\x1ftype\x1fnullable\x1fordinal` joined by `\x1e`. Field separators
/// are control characters so column names containing punctuation cannot
/// collide with the frame.
pub fn snapshot_hash(columns: &[ColumnDef]) -> String {
    let mut ordered: Vec<&ColumnDef> = columns.iter().collect();
    ordered.sort_by_key(|c| c.ordinal);

    let mut hasher = Sha256::new();
    for (i, col) in ordered.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1e]);
        }
        hasher.update(col.name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(col.data_type.as_bytes());
        hasher.update([0x1f]);
        hasher.update(if col.nullable { b"1" } else { b"0" });
        hasher.update([0x1f]);
        hasher.update(col.ordinal.to_string().as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

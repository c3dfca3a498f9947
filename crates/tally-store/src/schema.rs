//! SQL schema definitions.

/// Schema v1: a single ordered key-value table.
///
/// SQLite compares BLOBs with `memcmp`, so `ORDER BY key` matches the
/// byte order the in-memory backend uses.
pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key BLOB PRIMARY KEY,
    value BLOB NOT NULL
) WITHOUT ROWID;
"#;

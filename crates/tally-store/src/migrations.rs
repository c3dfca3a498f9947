//! Forward-only schema migrations.
//!
//! The applied version lives in `PRAGMA user_version`. Step `n` of
//! [`MIGRATIONS`] upgrades a store from version `n` to `n + 1`; a store
//! written by a newer binary is refused rather than guessed at.

use rusqlite::Connection;

use crate::{schema, Result, StoreError, SCHEMA_VERSION};

/// Upgrade steps, oldest first.
const MIGRATIONS: &[&str] = &[schema::SCHEMA_V1];

fn applied_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn run(conn: &Connection) -> Result<()> {
    let current = applied_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "store schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    for version in current..SCHEMA_VERSION {
        let step = MIGRATIONS.get(version as usize).ok_or_else(|| {
            StoreError::Migration(format!("no migration from schema v{version}"))
        })?;
        let target = version + 1;
        conn.execute_batch(&format!(
            "BEGIN;\n{step}\nPRAGMA user_version = {target};\nCOMMIT;"
        ))?;
        tracing::info!(from = version, to = target, "store schema migrated");
    }
    Ok(())
}

//! SQLite backend.
//!
//! One database file holding the `kv` table. WAL mode, batches applied
//! in a single transaction.

use std::collections::VecDeque;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::{migrations, BatchOp, KvIter, KvPair, KvStore, Result};

/// Rows fetched per page during iteration.
const PAGE_SIZE: i64 = 256;

const SELECT_FROM: &str = "SELECT key, value FROM kv
     WHERE key >= ?1 AND (?2 IS NULL OR key < ?2) ORDER BY key LIMIT ?3";

const SELECT_AFTER: &str = "SELECT key, value FROM kv
     WHERE key > ?1 AND (?2 IS NULL OR key < ?2) ORDER BY key LIMIT ?3";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    ///
    /// Configures WAL mode and runs any pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        configure(&conn)?;
        migrations::run(&conn)?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self { conn })
    }

    fn page(&self, from: &[u8], inclusive: bool, end: Option<&[u8]>) -> Result<Vec<KvPair>> {
        let sql = if inclusive { SELECT_FROM } else { SELECT_AFTER };
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![from, end, PAGE_SIZE], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}

impl KvStore for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")?
            .query_row([key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?
            .execute(params![key, value])?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM kv WHERE key = ?1")?
            .execute([key])?;
        Ok(())
    }

    fn iter_range<'a>(&'a self, start: &[u8], end: Option<&[u8]>) -> KvIter<'a> {
        Box::new(PagedIter {
            store: self,
            cursor: start.to_vec(),
            inclusive: true,
            end: end.map(<[u8]>::to_vec),
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    fn apply_batch(&mut self, batch: Vec<BatchOp>) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert =
                tx.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
            let mut remove = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
            for (key, value) in &batch {
                match value {
                    Some(value) => upsert.execute(params![key, value])?,
                    None => remove.execute([key])?,
                };
            }
        }
        tx.commit()?;
        tracing::trace!(writes = batch.len(), "batch committed");
        Ok(())
    }
}

/// Range iterator fetching [`PAGE_SIZE`] rows at a time, so an early stop
/// never reads the rest of the range.
struct PagedIter<'a> {
    store: &'a SqliteStore,
    cursor: Vec<u8>,
    inclusive: bool,
    end: Option<Vec<u8>>,
    buffer: VecDeque<KvPair>,
    exhausted: bool,
}

impl Iterator for PagedIter<'_> {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .store
                .page(&self.cursor, self.inclusive, self.end.as_deref())
            {
                Ok(rows) => {
                    self.exhausted = (rows.len() as i64) < PAGE_SIZE;
                    if let Some((last, _)) = rows.last() {
                        self.cursor = last.clone();
                        self.inclusive = false;
                    }
                    self.buffer.extend(rows);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

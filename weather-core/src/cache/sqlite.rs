//! SQLite-backed persistent cache tier.

use std::{fs, path::Path};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{PersistedRecord, PersistentStore};
use crate::error::CacheError;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the cache database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened weather cache database");

        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather_cache (
                location TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl PersistentStore for SqliteStore {
    fn get(&self, location: &str) -> Result<Option<PersistedRecord>, CacheError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT location, data, timestamp FROM weather_cache WHERE location = ?1",
                params![location],
                |row| {
                    Ok(PersistedRecord {
                        location: row.get(0)?,
                        data: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn upsert(&self, record: &PersistedRecord) -> Result<(), CacheError> {
        // A single statement, so SQLite applies it atomically.
        self.conn.lock().execute(
            r#"
            INSERT INTO weather_cache (location, data, timestamp)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(location) DO UPDATE SET
                data = excluded.data,
                timestamp = excluded.timestamp
            "#,
            params![record.location, record.data, record.timestamp],
        )?;
        Ok(())
    }
}

use super::{glob_regex, CacheBackend};
use crate::errors::{AppError, AppResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const CACHE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  expires_at INTEGER
);
";

#[derive(Debug)]
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(cache_error)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(cache_error)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(cache_error)?;
        conn.execute_batch(CACHE_SCHEMA_SQL).map_err(cache_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AppError::poisoned("sqlite cache"))
    }
}

impl CacheBackend for SqliteCache {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn()?;
        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(cache_error)?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= now => {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])
                    .map_err(cache_error)?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let expires_at = ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )
        .map_err(cache_error)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn()?;
        let live = conn
            .execute(
                "DELETE FROM cache_entries WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now],
            )
            .map_err(cache_error)?;
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])
            .map_err(cache_error)?;
        Ok(live > 0)
    }

    // Matched with the same glob rules as the in-memory backend; SQLite's own
    // GLOB would treat `[...]` as a character class.
    fn keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let regex = glob_regex(pattern)?;
        let now = Utc::now().timestamp_millis();
        let conn = self.conn()?;
        let mut statement = conn
            .prepare(
                "SELECT key FROM cache_entries
                 WHERE expires_at IS NULL OR expires_at > ?1
                 ORDER BY key ASC",
            )
            .map_err(cache_error)?;
        let keys = statement
            .query_map([now], |row| row.get::<_, String>(0))
            .map_err(cache_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(cache_error)?;
        Ok(keys.into_iter().filter(|key| regex.is_match(key)).collect())
    }
}

fn cache_error(error: rusqlite::Error) -> AppError {
    AppError::Cache(error.to_string())
}

//! SQLite-backed key-value store.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::schema::SCHEMA_SQL;
use crate::KeyValueStore;
use aws_integration_core::{Error, InterfaceConfig, Result};

/// Durable key-value store in a single SQLite file.
pub struct SqliteKv {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteKv {
    /// Open or create the store at `db_path`, creating parent directories.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }

        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        info!(
            "SqliteKv initialized: {} keys, path={}",
            store.count()?,
            db_path.display()
        );
        Ok(store)
    }

    /// Open the store at the location `config` names.
    pub fn from_config(config: &InterfaceConfig) -> Result<Self> {
        Self::open(config.store_path())
    }

    /// Store that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Database(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count)
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![key], |row| row.get(0))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![key, value, now])
        .map_err(|e| Error::Database(e.to_string()))?;
        debug!("kv set {}", key);
        Ok(())
    }

    fn unset(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteKv, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteKv::open(dir.path().join("state").join("kv.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_set_get_overwrite() {
        let (store, _dir) = test_store();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_unset() {
        let (store, _dir) = test_store();
        store.set("a", "1").unwrap();
        assert!(store.unset("a").unwrap());
        assert!(!store.unset("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_keys_with_prefix() {
        let (store, _dir) = test_store();
        store.set("endpoint.aws.request.b/0", "h2").unwrap();
        store.set("endpoint.aws.request.a/0", "h1").unwrap();
        store.set("endpoint.other.request.a/0", "h3").unwrap();

        let keys = store.keys_with_prefix("endpoint.aws.request.").unwrap();
        assert_eq!(
            keys,
            vec!["endpoint.aws.request.a/0", "endpoint.aws.request.b/0"]
        );
    }

    #[test]
    fn test_prefix_is_literal() {
        let (store, _dir) = test_store();
        store.set("a%b", "1").unwrap();
        store.set("axb", "2").unwrap();
        assert_eq!(store.keys_with_prefix("a%").unwrap(), vec!["a%b"]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.db");
        {
            let store = SqliteKv::open(&path).unwrap();
            store.set("endpoint.aws.request.a/0", "abc").unwrap();
        }
        let store = SqliteKv::open(&path).unwrap();
        assert_eq!(
            store.get("endpoint.aws.request.a/0").unwrap().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_from_config_uses_state_dir() {
        let dir = TempDir::new().unwrap();
        let config = InterfaceConfig {
            state_dir: dir.path().join("unit-state"),
            ..InterfaceConfig::default()
        };
        let store = SqliteKv::from_config(&config).unwrap();
        store.set("endpoint.aws.instance-id", "i-1").unwrap();

        assert_eq!(store.db_path(), Some(config.store_path().as_path()));
        assert!(config.store_path().exists());
    }

    #[test]
    fn test_in_memory() {
        let store = SqliteKv::open_in_memory().unwrap();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(store.db_path().is_none());
    }
}

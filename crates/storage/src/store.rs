use pagesync_core::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Namespaced key/value persistence shared by every target and model.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove every listed key. Missing keys are ignored.
    fn remove(&self, keys: &[String]) -> Result<()>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

/// Process-local store; state is lost on exit.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> Result<()> {
        let mut map = self.lock()?;
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// SQLite-backed store, one row per key with the value stored as JSON text.
#[derive(Clone)]
pub struct SqliteStateStore {
    inner: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStateStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open state db: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init state schema: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, text, now],
        )
        .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Transaction error: {}", e)))?;
        for key in keys {
            tx.execute("DELETE FROM kv_state WHERE key = ?1", params![key])
                .map_err(|e| Error::Storage(format!("Delete error: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("Commit error: {}", e)))?;
        debug!(count = keys.len(), "Removed state keys");
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv_state WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;
        let rows = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|e| Error::Storage(format!("Row error: {}", e)))?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStateStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStateStore::open(&dir.path().join("state.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_sqlite_set_get_overwrite() {
        let (store, _dir) = test_store();
        assert!(store.get("lastChatUrl_chatgpt_1").unwrap().is_none());

        store.set("lastChatUrl_chatgpt_1", json!("https://chatgpt.com/c/1")).unwrap();
        store.set("lastChatUrl_chatgpt_1", json!("https://chatgpt.com/c/2")).unwrap();
        assert_eq!(
            store.get("lastChatUrl_chatgpt_1").unwrap(),
            Some(json!("https://chatgpt.com/c/2"))
        );
    }

    #[test]
    fn test_sqlite_remove_and_prefix() {
        let (store, _dir) = test_store();
        store.set("pendingPDF_chatgpt_1", json!({"filename": "a.pdf"})).unwrap();
        store.set("pendingPDF_chatgpt_10", json!({"filename": "b.pdf"})).unwrap();
        store.set("autoAttachEnabled_1", json!(true)).unwrap();

        // Underscores in the prefix must match literally.
        let keys = store.keys_with_prefix("pendingPDF_chatgpt_1").unwrap();
        assert_eq!(keys, vec!["pendingPDF_chatgpt_1", "pendingPDF_chatgpt_10"]);

        store
            .remove(&["pendingPDF_chatgpt_1".to_string(), "missing".to_string()])
            .unwrap();
        assert!(store.get("pendingPDF_chatgpt_1").unwrap().is_none());
        assert!(store.get_bool("autoAttachEnabled_1").unwrap());
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        SqliteStateStore::open(&path)
            .unwrap()
            .set("autoAttachEnabled_5", json!(true))
            .unwrap();
        let reopened = SqliteStateStore::open(&path).unwrap();
        assert!(reopened.get_bool("autoAttachEnabled_5").unwrap());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        store.set("a_1", json!(1)).unwrap();
        store.set("a_2", json!(2)).unwrap();
        store.set("b_1", json!(3)).unwrap();
        assert_eq!(store.keys_with_prefix("a_").unwrap().len(), 2);
        store.remove(&["a_1".to_string()]).unwrap();
        assert!(store.get("a_1").unwrap().is_none());
        assert!(!store.get_bool("b_1").unwrap());
    }
}

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const HISTORY_ID_KEY: &str = "gmail_history_id";
const LABEL_RECORD_KEY: &str = "reply_label";
const SCHEMA_VERSION_KEY: &str = "schema_version";
const LATEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),
}

/// Durable record of the marker label. Written once, read on every process
/// start; must round-trip exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelRecord {
    pub id: String,
    pub name: String,
}

/// Key-value state persisted between runs: the history cursor and the
/// marker-label record.
pub struct StateStore {
    conn: Connection,
    path: PathBuf,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn default_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StoreError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".replybot").join("replybot.db"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY,
                value TEXT,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );
            "#,
        )?;

        let current = self.schema_version()?;
        if current > LATEST_SCHEMA_VERSION {
            return Err(StoreError::Config(format!(
                "state schema version {current} is newer than supported version {LATEST_SCHEMA_VERSION}"
            )));
        }
        if current < 1 {
            self.set(SCHEMA_VERSION_KEY, &LATEST_SCHEMA_VERSION.to_string())?;
        }
        Ok(())
    }

    fn schema_version(&self) -> Result<u32, StoreError> {
        match self.get(SCHEMA_VERSION_KEY)? {
            None => Ok(0),
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                StoreError::Config(format!("invalid schema version in state store: {raw}"))
            }),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1 LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn history_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(HISTORY_ID_KEY)?
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }

    pub fn set_history_id(&self, history_id: &str) -> Result<(), StoreError> {
        self.set(HISTORY_ID_KEY, history_id)
    }

    pub fn label_record(&self) -> Result<Option<LabelRecord>, StoreError> {
        let Some(raw) = self.get(LABEL_RECORD_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str::<LabelRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                warn!("discarding unreadable marker label record: {error}");
                Ok(None)
            }
        }
    }

    pub fn set_label_record(&self, record: &LabelRecord) -> Result<(), StoreError> {
        let raw = serde_json::to_string(record)?;
        self.set(LABEL_RECORD_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::{LabelRecord, StateStore};

    fn temp_store_path() -> PathBuf {
        std::env::temp_dir().join(format!("replybot-store-test-{}.db", Uuid::new_v4()))
    }

    #[test]
    fn fresh_store_has_no_cursor_or_label() {
        let path = temp_store_path();
        let store = StateStore::open(&path).expect("open store");

        assert_eq!(store.history_id().expect("read cursor"), None);
        assert_eq!(store.label_record().expect("read label record"), None);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn history_id_round_trips_and_overwrites() {
        let path = temp_store_path();
        let store = StateStore::open(&path).expect("open store");

        store.set_history_id("12345").expect("write cursor");
        assert_eq!(
            store.history_id().expect("read cursor").as_deref(),
            Some("12345")
        );

        store.set_history_id("12399").expect("overwrite cursor");
        assert_eq!(
            store.history_id().expect("read cursor").as_deref(),
            Some("12399")
        );

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn label_record_round_trips_exactly() {
        let path = temp_store_path();
        let store = StateStore::open(&path).expect("open store");

        let record = LabelRecord {
            id: "Label_17".to_string(),
            name: "Replybot/Auto-Replied".to_string(),
        };
        store.set_label_record(&record).expect("write label record");

        let read_back = store
            .label_record()
            .expect("read label record")
            .expect("label record present");
        assert_eq!(read_back, record);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn state_survives_reopen() {
        let path = temp_store_path();
        {
            let store = StateStore::open(&path).expect("open store");
            store.set_history_id("777").expect("write cursor");
        }

        let reopened = StateStore::open(&path).expect("reopen store");
        assert_eq!(
            reopened.history_id().expect("read cursor").as_deref(),
            Some("777")
        );

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unreadable_label_record_is_discarded() {
        let path = temp_store_path();
        let store = StateStore::open(&path).expect("open store");

        store.set("reply_label", "not json").expect("write raw value");
        assert_eq!(store.label_record().expect("read label record"), None);

        let _ = std::fs::remove_file(path);
    }
}

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::query::{ListOptions, RecordFilter, SortField};
use crate::record::{ConfigRecord, RecordDraft};
use crate::store::{EntityStore, StoreError};

const SELECT_COLUMNS: &str = "id, key, config_key, value, description, app_subtitle, app_name, is_active, created_at, updated_at";

/// SQLite-backed implementation of the EntityStore trait.
///
/// A durable local stand-in for the hosted store, used by the CLI and for
/// development. Calls run synchronously under the connection lock.
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
}

impl SqliteEntityStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn =
            Connection::open(path).map_err(|e| StoreError::Storage(format!("open: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Storage(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS app_config (
                id TEXT PRIMARY KEY,
                key TEXT,
                config_key TEXT,
                value TEXT,
                description TEXT,
                app_subtitle TEXT,
                app_name TEXT,
                is_active INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_app_config_key ON app_config(key);
            CREATE INDEX IF NOT EXISTS idx_app_config_config_key ON app_config(config_key);
            CREATE INDEX IF NOT EXISTS idx_app_config_updated ON app_config(updated_at);
            ",
        )
        .map_err(|e| StoreError::Storage(format!("init_schema: {}", e)))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConfigRecord> {
        let created_ms: i64 = row.get(8)?;
        let updated_ms: i64 = row.get(9)?;
        let is_active: Option<i64> = row.get(7)?;
        Ok(ConfigRecord {
            id: row.get(0)?,
            key: row.get(1)?,
            config_key: row.get(2)?,
            value: row.get(3)?,
            description: row.get(4)?,
            app_subtitle: row.get(5)?,
            app_name: row.get(6)?,
            is_active: is_active.map(|v| v != 0),
            created_at: Utc
                .timestamp_millis_opt(created_ms)
                .single()
                .unwrap_or_else(Utc::now),
            updated_at: Utc
                .timestamp_millis_opt(updated_ms)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<ConfigRecord>, StoreError> {
        conn.query_row(
            &format!("SELECT {} FROM app_config WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| StoreError::Storage(format!("get: {}", e)))
    }

    fn query(
        conn: &Connection,
        sql: &str,
        param: Option<&str>,
    ) -> Result<Vec<ConfigRecord>, StoreError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StoreError::Storage(format!("prepare: {}", e)))?;
        let rows = match param {
            Some(p) => stmt.query_map(params![p], Self::row_to_record),
            None => stmt.query_map([], Self::row_to_record),
        }
        .map_err(|e| StoreError::Storage(format!("query: {}", e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect: {}", e)))
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn create(&self, draft: RecordDraft) -> Result<ConfigRecord, StoreError> {
        let conn = self.lock()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO app_config (id, key, config_key, value, description, app_subtitle, app_name, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                draft.key,
                draft.config_key,
                draft.value,
                draft.description,
                draft.app_subtitle,
                draft.app_name,
                draft.is_active.map(|v| v as i64),
                now,
            ],
        )
        .map_err(|e| StoreError::Storage(format!("insert: {}", e)))?;
        Self::fetch(&conn, &id)?.ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, id: &str, draft: RecordDraft) -> Result<ConfigRecord, StoreError> {
        let conn = self.lock()?;
        let mut record = Self::fetch(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        draft.apply_to(&mut record);
        conn.execute(
            "UPDATE app_config SET key = ?2, config_key = ?3, value = ?4, description = ?5,
                    app_subtitle = ?6, app_name = ?7, is_active = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                id,
                record.key,
                record.config_key,
                record.value,
                record.description,
                record.app_subtitle,
                record.app_name,
                record.is_active.map(|v| v as i64),
                Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| StoreError::Storage(format!("update: {}", e)))?;
        Self::fetch(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get(&self, id: &str) -> Result<Option<ConfigRecord>, StoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM app_config WHERE id = ?1", params![id])
            .map_err(|e| StoreError::Storage(format!("delete: {}", e)))?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn filter(&self, filter: &RecordFilter) -> Result<Vec<ConfigRecord>, StoreError> {
        let conn = self.lock()?;
        let (column, value) = match filter {
            RecordFilter::KeyEq(k) => ("key", k),
            RecordFilter::ConfigKeyEq(k) => ("config_key", k),
        };
        let sql = format!(
            "SELECT {} FROM app_config WHERE {} = ?1 ORDER BY updated_at DESC",
            SELECT_COLUMNS, column
        );
        Self::query(&conn, &sql, Some(value))
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<ConfigRecord>, StoreError> {
        let conn = self.lock()?;
        let column = match options.sort {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
        };
        let direction = if options.descending { "DESC" } else { "ASC" };
        let mut sql = format!(
            "SELECT {} FROM app_config ORDER BY {} {}",
            SELECT_COLUMNS, column, direction
        );
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Self::query(&conn, &sql, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let created = store
            .create(RecordDraft::aliased("cfg", "{\"a\":1}").with_app_name("opsdesk"))
            .await
            .unwrap();
        let got = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(got.payload_text(), Some("{\"a\":1}"));
        assert_eq!(got.app_name.as_deref(), Some("opsdesk"));
        assert_eq!(got.is_active, Some(true));
    }

    #[tokio::test]
    async fn filter_by_both_key_fields() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        store.create(RecordDraft::aliased("cfg", "1")).await.unwrap();
        store
            .create(RecordDraft {
                config_key: Some("legacy".into()),
                value: Some("2".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            store.filter(&RecordFilter::KeyEq("cfg".into())).await.unwrap().len(),
            1
        );
        assert_eq!(
            store
                .filter(&RecordFilter::ConfigKeyEq("legacy".into()))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .filter(&RecordFilter::KeyEq("legacy".into()))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn update_keeps_untouched_fields() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let created = store
            .create(RecordDraft::aliased("cfg", "old").with_app_name("opsdesk"))
            .await
            .unwrap();
        let updated = store
            .update(&created.id, RecordDraft::aliased("cfg", "new"))
            .await
            .unwrap();
        assert_eq!(updated.value.as_deref(), Some("new"));
        assert_eq!(updated.app_name.as_deref(), Some("opsdesk"));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let err = store.delete("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opsdesk.db");
        {
            let store = SqliteEntityStore::open(&path).unwrap();
            store.create(RecordDraft::aliased("cfg", "1")).await.unwrap();
        }
        let reopened = SqliteEntityStore::open(&path).unwrap();
        assert_eq!(reopened.list(&ListOptions::recent(10)).await.unwrap().len(), 1);
    }
}

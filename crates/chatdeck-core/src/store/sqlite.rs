use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use super::RecordStore;
use crate::error::{PersistenceError, StoreResult};
use crate::state::{Message, Role};

/// Migrations applied in order. Each entry is (version, sql).
/// Append new entries; never edit existing ones.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS messages (
        seq        INTEGER PRIMARY KEY AUTOINCREMENT,
        conv_id    TEXT    NOT NULL,
        role       TEXT    NOT NULL,
        content    TEXT    NOT NULL DEFAULT '',
        timestamp  INTEGER NOT NULL,
        incomplete INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conv_ts
        ON messages (conv_id, timestamp);",
)];

/// SQLite-backed record store.
///
/// The connection is shared behind a mutex; every statement is short, so
/// calls run inline on the caller's task.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "Opened SQLite record store");
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Default database location under the platform data directory
    pub fn default_path() -> StoreResult<PathBuf> {
        dirs::data_dir()
            .map(|p| p.join("chatdeck").join("conversations.db"))
            .ok_or_else(|| PersistenceError::Unavailable("Could not determine data directory".into()))
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
             INSERT INTO schema_version (version)
                 SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version);",
        )?;

        let current: i64 = conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                info!(version, "Applying schema migration");
                conn.execute_batch(sql)?;
                conn.execute("UPDATE schema_version SET version = ?1", params![version])?;
            }
        }
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PersistenceError::Unavailable(format!("Failed to lock connection: {}", e)))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert_message(&self, conv_id: &str, message: &Message) -> StoreResult<()> {
        let conn = self.lock()?;
        insert_row(&conn, conv_id, message)?;
        Ok(())
    }

    async fn list_messages(&self, conv_id: &str) -> StoreResult<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp, incomplete
             FROM messages
             WHERE conv_id = ?1
             ORDER BY timestamp ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![conv_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, timestamp, incomplete) = row?;
            match role.parse::<Role>() {
                Ok(role) => messages.push(Message {
                    role,
                    content,
                    timestamp,
                    incomplete,
                }),
                Err(e) => warn!(conv_id, error = %e, "Skipping row"),
            }
        }
        Ok(messages)
    }

    async fn conversation_ids(&self) -> StoreResult<BTreeSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT conv_id FROM messages")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    async fn delete_conversation(&self, conv_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM messages WHERE conv_id = ?1", params![conv_id])?;
        info!(conv_id, removed, "Deleted conversation rows");
        Ok(())
    }

    async fn rename_conversation(&self, old_id: &str, new_id: &str) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let moved = tx.execute(
            "UPDATE messages SET conv_id = ?2 WHERE conv_id = ?1",
            params![old_id, new_id],
        )?;
        tx.commit()?;
        info!(old_id, new_id, moved, "Renamed conversation");
        Ok(())
    }

    async fn replace_conversation(&self, conv_id: &str, messages: &[Message]) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM messages WHERE conv_id = ?1", params![conv_id])?;
        for message in messages {
            insert_row(&tx, conv_id, message)?;
        }
        tx.commit()?;
        info!(conv_id, removed, rows = messages.len(), "Replaced conversation rows");
        Ok(())
    }
}

fn insert_row(conn: &Connection, conv_id: &str, message: &Message) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO messages (conv_id, role, content, timestamp, incomplete)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            conv_id,
            message.role.as_str(),
            message.content,
            message.timestamp,
            message.incomplete
        ],
    )
}

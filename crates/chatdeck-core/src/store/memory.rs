use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::RecordStore;
use crate::error::{PersistenceError, StoreResult};
use crate::state::Message;

#[derive(Debug, Clone)]
struct Row {
    conv_id: String,
    message: Message,
}

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<Row>,
    unreachable: bool,
    /// Writes left before every write fails; `None` means no limit
    writes_left: Option<usize>,
}

/// Process-local record store.
///
/// Useful for tests and for running without any persistence configured.
/// Clones share the same rows.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read and write fail until cleared
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unreachable = unreachable;
        }
    }

    /// Allow `count` more writes, then reject all writes; `None` lifts the limit
    pub fn fail_writes_after(&self, count: Option<usize>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.writes_left = count;
        }
    }

    /// Snapshot of every row as `(conv_id, message)`, in insertion order
    pub fn rows(&self) -> Vec<(String, Message)> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .rows
                    .iter()
                    .map(|r| (r.conv_id.clone(), r.message.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> StoreResult<T> {
        let inner = self
            .inner
            .lock()
            .map_err(|e| PersistenceError::Unavailable(format!("Failed to lock rows: {}", e)))?;
        if inner.unreachable {
            return Err(PersistenceError::Unavailable("memory store marked unreachable".into()));
        }
        Ok(f(&inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> StoreResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| PersistenceError::Unavailable(format!("Failed to lock rows: {}", e)))?;
        if inner.unreachable {
            return Err(PersistenceError::Unavailable("memory store marked unreachable".into()));
        }
        match inner.writes_left {
            Some(0) => {
                return Err(PersistenceError::Rejected {
                    status: 503,
                    body: "write limit reached".into(),
                })
            }
            Some(n) => inner.writes_left = Some(n - 1),
            None => {}
        }
        Ok(f(&mut inner))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_message(&self, conv_id: &str, message: &Message) -> StoreResult<()> {
        self.write(|inner| {
            inner.rows.push(Row {
                conv_id: conv_id.to_string(),
                message: message.clone(),
            })
        })
    }

    async fn list_messages(&self, conv_id: &str) -> StoreResult<Vec<Message>> {
        self.read(|inner| {
            let mut messages: Vec<Message> = inner
                .rows
                .iter()
                .filter(|r| r.conv_id == conv_id)
                .map(|r| r.message.clone())
                .collect();
            // Stable sort keeps insertion order for equal timestamps
            messages.sort_by_key(|m| m.timestamp);
            messages
        })
    }

    async fn conversation_ids(&self) -> StoreResult<BTreeSet<String>> {
        self.read(|inner| inner.rows.iter().map(|r| r.conv_id.clone()).collect())
    }

    async fn delete_conversation(&self, conv_id: &str) -> StoreResult<()> {
        self.write(|inner| inner.rows.retain(|r| r.conv_id != conv_id))
    }
}

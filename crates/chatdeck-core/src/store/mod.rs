//! Record store adapters
//!
//! The durable backing for conversations: one row per message, keyed by
//! conversation id. Backends only append, list, delete, rename and replace; all
//! reconciliation with the in-memory cache happens in the session.

pub mod memory;
pub mod rest;
pub mod sqlite;

use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::state::{next_timestamp, Message};

pub use memory::MemoryRecordStore;
pub use rest::RestRecordStore;
pub use sqlite::SqliteRecordStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one row. Empty content is allowed.
    async fn insert_message(&self, conv_id: &str, message: &Message) -> StoreResult<()>;

    /// All rows for a conversation, oldest first. Unknown ids yield an empty list.
    async fn list_messages(&self, conv_id: &str) -> StoreResult<Vec<Message>>;

    /// Every conversation id with at least one row
    async fn conversation_ids(&self) -> StoreResult<BTreeSet<String>>;

    async fn delete_conversation(&self, conv_id: &str) -> StoreResult<()>;

    /// Move every row of `old_id` to `new_id`.
    ///
    /// The default is copy-then-delete, so a failure part way leaves the
    /// original rows in place. Backends with a native rename override it.
    async fn rename_conversation(&self, old_id: &str, new_id: &str) -> StoreResult<()> {
        copy_then_delete(self, old_id, new_id).await
    }

    /// Replace every row of `conv_id` with `messages`, in order.
    ///
    /// The default writes the new rows under a scratch id before touching the
    /// old ones. Backends with transactions override it.
    async fn replace_conversation(&self, conv_id: &str, messages: &[Message]) -> StoreResult<()> {
        write_then_swap(self, conv_id, messages).await
    }

    /// Conversation ids for display, never empty: falls back to `default_id`
    /// when the store has no rows or cannot be reached.
    async fn list_conversation_ids(&self, default_id: &str) -> BTreeSet<String> {
        match self.conversation_ids().await {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => BTreeSet::from([default_id.to_string()]),
            Err(e) => {
                warn!(error = %e, "Record store unreachable, using default conversation");
                BTreeSet::from([default_id.to_string()])
            }
        }
    }
}

/// Compensating rename: copy all rows to `new_id`, then delete `old_id`.
///
/// A failed copy removes whatever was copied and reports the error. A failed
/// delete leaves both ids populated; the caller sees the error and the
/// duplicate shows up on the next id listing.
pub async fn copy_then_delete<S>(store: &S, old_id: &str, new_id: &str) -> StoreResult<()>
where
    S: RecordStore + ?Sized,
{
    let rows = store.list_messages(old_id).await?;

    for (copied, row) in rows.iter().enumerate() {
        if let Err(e) = store.insert_message(new_id, row).await {
            warn!(old_id, new_id, copied, error = %e, "Rename copy failed, rolling back");
            if let Err(cleanup) = store.delete_conversation(new_id).await {
                warn!(new_id, error = %cleanup, "Rollback of partial rename copy failed");
            }
            return Err(e);
        }
    }

    store.delete_conversation(old_id).await?;
    info!(old_id, new_id, rows = rows.len(), "Renamed conversation by copy");
    Ok(())
}

/// Compensating replace: write `messages` under a scratch id, then swap them in.
///
/// A failed write removes the scratch rows and leaves `conv_id` untouched.
/// If the swap itself fails after the old rows are gone, they are written
/// back before the error is returned.
pub async fn write_then_swap<S>(store: &S, conv_id: &str, messages: &[Message]) -> StoreResult<()>
where
    S: RecordStore + ?Sized,
{
    let previous = store.list_messages(conv_id).await?;
    let scratch = format!("{}~replace-{}", conv_id, next_timestamp());

    for (written, message) in messages.iter().enumerate() {
        if let Err(e) = store.insert_message(&scratch, message).await {
            warn!(conv_id, written, error = %e, "Replacement write failed, keeping existing rows");
            discard(store, &scratch).await;
            return Err(e);
        }
    }

    if let Err(e) = store.delete_conversation(conv_id).await {
        discard(store, &scratch).await;
        return Err(e);
    }

    if let Err(e) = store.rename_conversation(&scratch, conv_id).await {
        warn!(conv_id, error = %e, "Could not swap in replacement, restoring previous rows");
        let emptied = store.list_messages(conv_id).await.map(|rows| rows.is_empty()).unwrap_or(false);
        if emptied {
            for row in &previous {
                if let Err(restore) = store.insert_message(conv_id, row).await {
                    warn!(conv_id, error = %restore, "Restoring previous rows failed");
                    break;
                }
            }
        }
        return Err(e);
    }

    info!(conv_id, rows = messages.len(), replaced = previous.len(), "Replaced conversation rows");
    Ok(())
}

async fn discard<S>(store: &S, scratch: &str)
where
    S: RecordStore + ?Sized,
{
    if let Err(e) = store.delete_conversation(scratch).await {
        warn!(scratch, error = %e, "Could not remove scratch rows");
    }
}

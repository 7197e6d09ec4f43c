//! Conversation lifecycle
//!
//! A [`Session`] is the per-user context every operation runs against: it owns
//! the conversation cache, the active selection, and the set of ids known to
//! exist. Store writes always happen before the cache is touched, so a failed
//! write leaves the cache as it was.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::ConversationCache;
use crate::error::{ChatError, ChatResult, ValidationError};
use crate::state::{Message, Role};
use crate::store::RecordStore;
use crate::transcript::{self, LineIssue};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Respond concisely and accurately.";
pub const DEFAULT_ID_PREFIX: &str = "对话 ";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Prepended to every conversation at load time, never stored as a real row
    pub system_prompt: String,
    /// New conversations are named `<prefix><n>` with the smallest free `n`
    pub id_prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }
}

/// Outcome of a transcript import
#[derive(Debug)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: Vec<LineIssue>,
}

pub struct Session {
    store: Arc<dyn RecordStore>,
    cache: ConversationCache,
    known: BTreeSet<String>,
    active: String,
    settings: SessionSettings,
    in_flight: Arc<AtomicBool>,
}

impl Session {
    /// Open a session: pick the first stored conversation (or the default id)
    /// and load it. Never fails; an unreachable store yields an empty default
    /// conversation.
    pub async fn start(store: Arc<dyn RecordStore>, settings: SessionSettings) -> Self {
        let default_id = format!("{}1", settings.id_prefix);
        let known = store.list_conversation_ids(&default_id).await;

        let active = sorted_ids(&settings.id_prefix, known.iter())
            .into_iter()
            .next()
            .unwrap_or(default_id);

        let mut session = Self {
            store,
            cache: ConversationCache::new(),
            known,
            active: active.clone(),
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
        };

        match session.store.list_messages(&active).await {
            Ok(rows) => {
                if rows.is_empty() {
                    // Make the implicit first conversation durable
                    if let Err(e) = session.store.insert_message(&active, &Message::system("")).await {
                        warn!(conv_id = %active, error = %e, "Could not persist conversation marker");
                    }
                }
                let history = session.with_system_prompt(rows);
                session.cache.put(&active, history);
            }
            Err(e) => {
                warn!(conv_id = %active, error = %e, "Could not load history, starting empty");
                session.cache.put(&active, vec![session.system_message()]);
            }
        }

        info!(conv_id = %session.active, conversations = session.known.len(), "Session started");
        session
    }

    pub fn active_id(&self) -> &str {
        &self.active
    }

    /// Messages of the active conversation, system prompt first
    pub fn active_messages(&self) -> &[Message] {
        self.cache.get(&self.active).unwrap_or(&[])
    }

    pub fn messages(&self, id: &str) -> ChatResult<&[Message]> {
        self.cache.get(id)
    }

    /// Every known conversation id, `<prefix><n>` names first in numeric order
    pub fn list(&self) -> Vec<String> {
        let mut ids = self.known.clone();
        ids.extend(self.cache.ids().map(str::to_string));
        sorted_ids(&self.settings.id_prefix, ids.iter())
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.known.contains(id) || self.cache.contains(id)
    }

    /// True while a streaming response holds the session
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Re-read conversation ids from the store
    pub async fn refresh(&mut self) -> ChatResult<()> {
        self.ensure_idle()?;
        let ids = self.store.conversation_ids().await?;
        self.known = ids;
        self.known.extend(self.cache.ids().map(str::to_string));
        self.known.insert(self.active.clone());
        debug!(conversations = self.known.len(), "Refreshed conversation ids");
        Ok(())
    }

    /// Bring a conversation into the cache if it isn't there yet
    pub async fn load(&mut self, id: &str) -> ChatResult<()> {
        if self.cache.contains(id) {
            return Ok(());
        }
        let rows = self.store.list_messages(id).await?;
        debug!(conv_id = id, rows = rows.len(), "Loaded conversation");
        let history = self.with_system_prompt(rows);
        self.cache.put(id, history);
        self.known.insert(id.to_string());
        Ok(())
    }

    /// Make a conversation active. Ids this session hasn't seen are looked up
    /// in the store, so conversations started elsewhere can be opened.
    pub async fn select(&mut self, id: &str) -> ChatResult<()> {
        self.ensure_idle()?;
        if !self.is_known(id) {
            let rows = self.store.list_messages(id).await?;
            if rows.is_empty() {
                return Err(ChatError::NotFound(id.to_string()));
            }
            let history = self.with_system_prompt(rows);
            self.cache.put(id, history);
            self.known.insert(id.to_string());
            debug!(conv_id = id, "Found conversation in store");
        }
        self.load(id).await?;
        self.active = id.to_string();
        info!(conv_id = id, "Selected conversation");
        Ok(())
    }

    /// Start a new, empty conversation and make it active. Returns its id.
    pub async fn create(&mut self) -> ChatResult<String> {
        self.ensure_idle()?;

        // Uniqueness is checked against the store, so it must be readable
        let stored = self.store.conversation_ids().await?;

        let mut taken: BTreeSet<String> = self.list().into_iter().collect();
        taken.extend(stored.iter().cloned());
        let id = (1u64..)
            .map(|n| format!("{}{}", self.settings.id_prefix, n))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_default();

        self.store.insert_message(&id, &Message::system("")).await?;

        self.known.extend(stored);
        self.cache.put(&id, vec![self.system_message()]);
        self.known.insert(id.clone());
        self.active = id.clone();
        info!(conv_id = %id, "Created conversation");
        Ok(id)
    }

    /// Delete a conversation. The last remaining conversation cannot be deleted.
    pub async fn delete(&mut self, id: &str) -> ChatResult<()> {
        self.ensure_idle()?;
        if !self.is_known(id) {
            return Err(ChatError::NotFound(id.to_string()));
        }
        if self.list().len() <= 1 {
            return Err(ValidationError::LastConversation.into());
        }

        self.store.delete_conversation(id).await?;

        let _ = self.cache.remove(id);
        self.known.remove(id);
        info!(conv_id = id, "Deleted conversation");

        if self.active == id {
            let next = self.list().into_iter().next().unwrap_or_default();
            self.activate_with_fallback(&next).await;
        }
        Ok(())
    }

    /// Rename a conversation. The store is renamed first; if that fails the
    /// cache and selection are left untouched.
    pub async fn rename(&mut self, old_id: &str, new_id: &str) -> ChatResult<()> {
        self.ensure_idle()?;

        let new_id = new_id.trim();
        if new_id.is_empty() {
            return Err(ValidationError::InvalidId(new_id.to_string()).into());
        }
        if !self.is_known(old_id) {
            return Err(ChatError::NotFound(old_id.to_string()));
        }
        // Other sessions may have created this name since we last looked
        if let Ok(stored) = self.store.conversation_ids().await {
            self.known.extend(stored);
        }
        if self.is_known(new_id) {
            return Err(ValidationError::DuplicateId(new_id.to_string()).into());
        }

        self.store.rename_conversation(old_id, new_id).await?;

        if self.cache.contains(old_id) {
            self.cache.rename(old_id, new_id)?;
        }
        self.known.remove(old_id);
        self.known.insert(new_id.to_string());
        if self.active == old_id {
            self.active = new_id.to_string();
        }
        info!(old_id, new_id, "Renamed conversation");
        Ok(())
    }

    /// Transcript text for a conversation (system prompt omitted)
    pub async fn export(&mut self, id: &str) -> ChatResult<String> {
        if !self.is_known(id) {
            return Err(ChatError::NotFound(id.to_string()));
        }
        self.load(id).await?;
        Ok(transcript::encode(self.cache.get(id)?))
    }

    /// Replace a conversation's messages with those parsed from `text`.
    ///
    /// Unparseable lines are reported, not fatal. The stored rows are swapped
    /// in one step, so a failed write keeps the old messages in both the
    /// store and the cache.
    pub async fn import(&mut self, id: &str, text: &str) -> ChatResult<ImportReport> {
        self.ensure_idle()?;
        if !self.is_known(id) {
            return Err(ChatError::NotFound(id.to_string()));
        }

        // Stamped before the decoded messages so it stays first in the store
        let marker = Message::system("");
        let decoded = transcript::decode(text);
        for issue in &decoded.skipped {
            warn!(conv_id = id, line = issue.line, "Skipping transcript line");
        }

        let mut rows = Vec::with_capacity(decoded.messages.len() + 1);
        rows.push(marker);
        rows.extend(decoded.messages.iter().cloned());
        if let Err(e) = self.store.replace_conversation(id, &rows).await {
            warn!(conv_id = id, error = %e, "Import failed, conversation unchanged");
            return Err(e.into());
        }

        let mut history = vec![self.system_message()];
        history.extend(decoded.messages.iter().cloned());
        self.cache.put(id, history);
        self.known.insert(id.to_string());

        info!(conv_id = id, imported = decoded.messages.len(), skipped = decoded.skipped.len(), "Imported transcript");
        Ok(ImportReport {
            imported: decoded.messages.len(),
            skipped: decoded.skipped,
        })
    }

    pub(crate) fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn cache_mut(&mut self) -> &mut ConversationCache {
        &mut self.cache
    }

    pub(crate) fn in_flight(&self) -> &Arc<AtomicBool> {
        &self.in_flight
    }

    pub(crate) fn ensure_idle(&self) -> ChatResult<()> {
        if self.is_busy() {
            return Err(ValidationError::Busy.into());
        }
        Ok(())
    }

    /// Make `id` active, loading it; an unreadable store leaves an empty history
    async fn activate_with_fallback(&mut self, id: &str) {
        if let Err(e) = self.load(id).await {
            warn!(conv_id = id, error = %e, "Could not load history, showing it empty");
            self.cache.put(id, vec![self.system_message()]);
            self.known.insert(id.to_string());
        }
        self.active = id.to_string();
    }

    fn system_message(&self) -> Message {
        Message::system(self.settings.system_prompt.clone())
    }

    fn with_system_prompt(&self, rows: Vec<Message>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(rows.len() + 1);
        messages.push(self.system_message());
        messages.extend(rows.into_iter().filter(|m| m.role != Role::System));
        messages
    }
}

/// `<prefix><n>` ids in numeric order, then everything else alphabetically
fn sorted_ids<'a>(prefix: &str, ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut ids: Vec<&String> = ids.collect();
    ids.sort_by_key(|id| match id.strip_prefix(prefix).and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => (0u8, n, id.as_str()),
        None => (1u8, 0, id.as_str()),
    });
    ids.dedup();
    ids.into_iter().cloned().collect()
}

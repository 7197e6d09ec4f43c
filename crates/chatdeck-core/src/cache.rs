//! In-memory conversation cache
//!
//! Pure mapping from conversation id to its ordered messages. No I/O; the
//! session decides when entries are loaded, replaced, or invalidated.

use std::collections::HashMap;

use crate::error::{ChatError, ChatResult};
use crate::state::Message;

#[derive(Debug, Default)]
pub struct ConversationCache {
    entries: HashMap<String, Vec<Message>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> ChatResult<&[Message]> {
        self.entries
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    /// Insert or replace an entry
    pub fn put(&mut self, id: &str, messages: Vec<Message>) {
        self.entries.insert(id.to_string(), messages);
    }

    pub fn append_message(&mut self, id: &str, message: Message) -> ChatResult<()> {
        self.entries
            .get_mut(id)
            .map(|messages| messages.push(message))
            .ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    pub fn remove(&mut self, id: &str) -> ChatResult<Vec<Message>> {
        self.entries
            .remove(id)
            .ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    /// Move an entry to a new key, keeping message order
    pub fn rename(&mut self, old_id: &str, new_id: &str) -> ChatResult<()> {
        let messages = self.remove(old_id)?;
        self.entries.insert(new_id.to_string(), messages);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

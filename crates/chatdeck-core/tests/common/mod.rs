#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chatdeck_core::{
    CompletionError, CompletionErrorKind, CompletionSource, FragmentStream, MemoryRecordStore, Message, RecordStore,
    Role, Session, SessionSettings,
};

/// What the next completion request gets back
pub enum Reply {
    Stream(Vec<Result<String, CompletionError>>),
    Refuse(CompletionError),
}

impl Reply {
    pub fn text(fragments: &[&str]) -> Self {
        Reply::Stream(fragments.iter().map(|f| Ok(f.to_string())).collect())
    }

    /// Fragments followed by a mid-stream failure
    pub fn broken(fragments: &[&str], kind: CompletionErrorKind) -> Self {
        let mut items: Vec<Result<String, CompletionError>> = fragments.iter().map(|f| Ok(f.to_string())).collect();
        items.push(Err(CompletionError::new(kind, "stream cut")));
        Reply::Stream(items)
    }
}

/// Completion source that replays canned replies and records every request
#[derive(Default)]
pub struct ScriptedSource {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedSource {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    async fn stream_completion(&self, messages: &[Message]) -> Result<FragmentStream, CompletionError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Refuse(e)) => Err(e),
            Some(Reply::Stream(items)) => Ok(stream::iter(items).boxed()),
            None => Ok(stream::empty().boxed()),
        }
    }
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        system_prompt: "You are a test assistant.".to_string(),
        id_prefix: "对话 ".to_string(),
    }
}

pub async fn start(store: &MemoryRecordStore) -> Session {
    let store: Arc<dyn RecordStore> = Arc::new(store.clone());
    Session::start(store, settings()).await
}

/// `(role, content)` of every non-system message
pub fn dialogue(messages: &[Message]) -> Vec<(Role, String)> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| (m.role, m.content.clone()))
        .collect()
}

/// Stored non-system rows of one conversation, in insertion order
pub fn stored(store: &MemoryRecordStore, conv_id: &str) -> Vec<(Role, String)> {
    store
        .rows()
        .into_iter()
        .filter(|(id, m)| id == conv_id && m.role != Role::System)
        .map(|(_, m)| (m.role, m.content))
        .collect()
}

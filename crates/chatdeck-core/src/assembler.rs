//! Streaming response assembly
//!
//! A [`Turn`] is one user message plus the assistant reply streaming back for
//! it. Fragments accumulate as they arrive; the reply is written to the store
//! and cache only when the turn is committed, and committing consumes the
//! turn so it can happen at most once.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ai::{CompletionError, CompletionSource, FragmentStream};
use crate::error::{ChatResult, ValidationError};
use crate::session::Session;
use crate::state::Message;

/// Appended to in-progress assistant text
pub const CURSOR: &str = "▌";

#[derive(Debug)]
pub enum TurnOutcome {
    /// The model finished; the reply is stored and cached
    Completed(Message),
    /// The stream failed. Any partial text was stored flagged incomplete.
    Interrupted {
        partial: Option<Message>,
        error: CompletionError,
    },
}

/// Marks the session busy until dropped
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn claim(flag: &Arc<AtomicBool>) -> ChatResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ValidationError::Busy)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Assembler {
    source: Arc<dyn CompletionSource>,
}

impl Assembler {
    pub fn new(source: Arc<dyn CompletionSource>) -> Self {
        Self { source }
    }

    /// Record the user's message on the active conversation and open the
    /// reply stream.
    ///
    /// If the store rejects the user message nothing changes. If the stream
    /// cannot be opened the user message stays recorded.
    pub async fn begin(&self, session: &mut Session, text: &str) -> ChatResult<Turn> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let guard = InFlight::claim(session.in_flight())?;
        let conv_id = session.active_id().to_string();

        let user = Message::user(text);
        session.store().insert_message(&conv_id, &user).await?;
        session.cache_mut().append_message(&conv_id, user)?;

        let history = session.active_messages().to_vec();
        debug!(conv_id = %conv_id, messages = history.len(), "Requesting completion");
        let stream = self.source.stream_completion(&history).await.map_err(|e| {
            warn!(conv_id = %conv_id, error = %e, "Completion request failed");
            e
        })?;

        Ok(Turn {
            conv_id,
            stream: Some(stream),
            text: String::new(),
            error: None,
            committed: false,
            _guard: guard,
        })
    }

    /// Run a whole turn, calling `on_fragment` with each piece of text as it arrives
    pub async fn submit<F>(&self, session: &mut Session, text: &str, mut on_fragment: F) -> ChatResult<TurnOutcome>
    where
        F: FnMut(&str),
    {
        let mut turn = self.begin(session, text).await?;
        while let Some(fragment) = turn.next_fragment().await {
            on_fragment(&fragment);
        }
        turn.commit(session).await
    }
}

/// An assistant reply in progress
pub struct Turn {
    conv_id: String,
    /// `None` once the stream has ended or failed
    stream: Option<FragmentStream>,
    text: String,
    error: Option<CompletionError>,
    committed: bool,
    _guard: InFlight,
}

impl Turn {
    pub fn conversation_id(&self) -> &str {
        &self.conv_id
    }

    /// Wait for the next fragment. `None` once the stream is finished.
    pub async fn next_fragment(&mut self) -> Option<String> {
        let stream = self.stream.as_mut()?;
        match stream.next().await {
            Some(Ok(fragment)) => {
                self.text.push_str(&fragment);
                Some(fragment)
            }
            Some(Err(e)) => {
                warn!(conv_id = %self.conv_id, error = %e, received = self.text.len(), "Completion stream failed");
                self.error = Some(e);
                self.stream = None;
                None
            }
            None => {
                self.stream = None;
                None
            }
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Text received so far with the streaming cursor
    pub fn display_text(&self) -> String {
        format!("{}{}", self.text, CURSOR)
    }

    /// Finish the turn: drain the stream, then store and cache the reply.
    ///
    /// On a stream error, non-empty partial text is stored with
    /// `incomplete` set; an empty reply stores nothing. A store failure
    /// leaves the cache untouched.
    pub async fn commit(mut self, session: &mut Session) -> ChatResult<TurnOutcome> {
        while self.next_fragment().await.is_some() {}
        self.committed = true;

        let text = std::mem::take(&mut self.text);
        let (message, error) = match self.error.take() {
            None => (Message::assistant(text), None),
            Some(error) if text.is_empty() => {
                info!(conv_id = %self.conv_id, "Turn failed before any text arrived");
                return Ok(TurnOutcome::Interrupted { partial: None, error });
            }
            Some(error) => (Message::incomplete_assistant(text), Some(error)),
        };

        session.store().insert_message(&self.conv_id, &message).await?;
        session.cache_mut().append_message(&self.conv_id, message.clone())?;

        info!(
            conv_id = %self.conv_id,
            chars = message.content.chars().count(),
            incomplete = message.incomplete,
            "Committed assistant reply"
        );
        Ok(match error {
            None => TurnOutcome::Completed(message),
            Some(error) => TurnOutcome::Interrupted {
                partial: Some(message),
                error,
            },
        })
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if !self.committed {
            info!(conv_id = %self.conv_id, received = self.text.len(), "Turn abandoned, nothing committed");
        }
    }
}

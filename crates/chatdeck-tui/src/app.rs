use std::path::Path;
use ratatui::widgets::ListState;
use tracing::{info, warn};
use chatdeck_core::{Assembler, ChatError, Session, Turn, TurnOutcome};
use crate::input::TextInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
    Prompt(PromptKind),
    ConfirmDelete,
}

/// Single-line popups that act on the highlighted conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Rename,
    Export,
    Import,
}

impl PromptKind {
    pub fn title(&self) -> &'static str {
        match self {
            PromptKind::Rename => " Rename conversation ",
            PromptKind::Export => " Export to file ",
            PromptKind::Import => " Import from file ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub is_error: bool,
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Conversation state
    pub session: Session,
    pub assembler: Assembler,
    pub model: String,
    /// Reply currently streaming into the active conversation
    pub turn: Option<Turn>,

    // Sidebar
    pub conversations: Vec<String>,
    pub sidebar_state: ListState,

    // Text fields
    pub input: TextInput,
    pub prompt: TextInput,

    pub notice: Option<Notice>,

    // Chat pane scrolling; sizes are written by the renderer
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub follow_chat: bool,

    pub animation_frame: u8,
}

impl App {
    pub fn new(session: Session, assembler: Assembler, model: String) -> Self {
        let mut app = Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            session,
            assembler,
            model,
            turn: None,
            conversations: Vec::new(),
            sidebar_state: ListState::default(),
            input: TextInput::default(),
            prompt: TextInput::default(),
            notice: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_chat: true,
            animation_frame: 0,
        };
        app.refresh_list();
        app
    }

    pub fn is_streaming(&self) -> bool {
        self.turn.is_some()
    }

    /// Rebuild the sidebar from the session and highlight the active conversation
    pub fn refresh_list(&mut self) {
        self.conversations = self.session.list();
        let active = self.session.active_id();
        let idx = self.conversations.iter().position(|id| id == active);
        self.sidebar_state.select(idx.or(Some(0)));
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.sidebar_state
            .selected()
            .and_then(|i| self.conversations.get(i))
            .map(String::as_str)
    }

    pub fn sidebar_down(&mut self) {
        if self.conversations.is_empty() {
            return;
        }
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some((i + 1).min(self.conversations.len() - 1)));
    }

    pub fn sidebar_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
    }

    pub fn notify(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            text: text.into(),
            is_error: false,
        });
    }

    pub fn notify_error(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            text: text.into(),
            is_error: true,
        });
    }

    fn report(&mut self, err: &ChatError) {
        warn!(error = %err, "Operation failed");
        let text = match err {
            ChatError::Completion(e) => format!("{} ({})", e, e.kind.hint()),
            other => other.to_string(),
        };
        self.notify_error(text);
    }

    /// Switch to the highlighted conversation
    pub async fn open_highlighted(&mut self) {
        let Some(id) = self.highlighted().map(str::to_string) else {
            return;
        };
        match self.session.select(&id).await {
            Ok(()) => {
                self.notice = None;
                self.follow_chat = true;
            }
            Err(e) => self.report(&e),
        }
        self.refresh_list();
    }

    pub async fn new_conversation(&mut self) {
        match self.session.create().await {
            Ok(id) => {
                self.notify(format!("Created {}", id));
                self.follow_chat = true;
            }
            Err(e) => self.report(&e),
        }
        self.refresh_list();
    }

    pub async fn reload_conversations(&mut self) {
        match self.session.refresh().await {
            Ok(()) => self.notify("Conversation list reloaded"),
            Err(e) => self.report(&e),
        }
        self.refresh_list();
    }

    pub fn start_delete(&mut self) {
        if self.highlighted().is_some() {
            self.input_mode = InputMode::ConfirmDelete;
        }
    }

    pub async fn confirm_delete(&mut self) {
        self.input_mode = InputMode::Normal;
        let Some(id) = self.highlighted().map(str::to_string) else {
            return;
        };
        match self.session.delete(&id).await {
            Ok(()) => self.notify(format!("Deleted {}", id)),
            Err(e) => self.report(&e),
        }
        self.refresh_list();
    }

    /// Open a prompt popup, prefilled where there is an obvious default
    pub fn start_prompt(&mut self, kind: PromptKind) {
        let Some(id) = self.highlighted().map(str::to_string) else {
            return;
        };
        self.prompt = match kind {
            PromptKind::Rename => TextInput::with_value(&id),
            PromptKind::Export => TextInput::with_value(&default_export_name(&id)),
            PromptKind::Import => TextInput::default(),
        };
        self.input_mode = InputMode::Prompt(kind);
    }

    pub async fn submit_prompt(&mut self, kind: PromptKind) {
        self.input_mode = InputMode::Normal;
        let value = self.prompt.take();
        let Some(id) = self.highlighted().map(str::to_string) else {
            return;
        };
        if value.trim().is_empty() && kind != PromptKind::Rename {
            return;
        }

        match kind {
            PromptKind::Rename => match self.session.rename(&id, &value).await {
                Ok(()) => self.notify(format!("Renamed {} to {}", id, value.trim())),
                Err(e) => self.report(&e),
            },
            PromptKind::Export => self.export_to(&id, Path::new(value.trim())).await,
            PromptKind::Import => self.import_from(&id, Path::new(value.trim())).await,
        }
        self.refresh_list();
    }

    pub async fn export_to(&mut self, id: &str, path: &Path) {
        let text = match self.session.export(id).await {
            Ok(text) => text,
            Err(e) => return self.report(&e),
        };
        match tokio::fs::write(path, text).await {
            Ok(()) => {
                info!(conv_id = id, path = %path.display(), "Exported transcript");
                self.notify(format!("Exported {} to {}", id, path.display()));
            }
            Err(e) => self.notify_error(format!("Could not write {}: {}", path.display(), e)),
        }
    }

    pub async fn import_from(&mut self, id: &str, path: &Path) {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => return self.notify_error(format!("Could not read {}: {}", path.display(), e)),
        };
        match self.session.import(id, &text).await {
            Ok(report) if report.skipped.is_empty() => {
                self.notify(format!("Imported {} messages into {}", report.imported, id));
            }
            Ok(report) => {
                self.notify_error(format!(
                    "Imported {} messages into {}, skipped {} ({})",
                    report.imported,
                    id,
                    report.skipped.len(),
                    report.skipped[0]
                ));
            }
            Err(e) => self.report(&e),
        }
        self.follow_chat = true;
    }

    /// Send the input box as a user message and start streaming the reply
    pub async fn send_message(&mut self) {
        if self.is_streaming() {
            self.notify_error("Wait for the reply to finish (Esc cancels it)");
            return;
        }
        let text = self.input.take();
        if text.trim().is_empty() {
            return;
        }

        match self.assembler.begin(&mut self.session, &text).await {
            Ok(turn) => {
                self.turn = Some(turn);
                self.notice = None;
            }
            // The user message was recorded; only the request failed
            Err(e @ ChatError::Completion(_)) => self.report(&e),
            Err(e) => {
                self.input = TextInput::with_value(&text);
                self.report(&e);
            }
        }
        self.follow_chat = true;
        self.scroll_chat_to_bottom();
    }

    pub fn on_fragment(&mut self) {
        if self.follow_chat {
            self.scroll_chat_to_bottom();
        }
    }

    /// Store the finished reply
    pub async fn finish_turn(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        match turn.commit(&mut self.session).await {
            Ok(TurnOutcome::Completed(_)) => {}
            Ok(TurnOutcome::Interrupted { partial, error }) => {
                let kept = if partial.is_some() { ", partial reply kept" } else { "" };
                self.notify_error(format!("{} ({}){}", error, error.kind.hint(), kept));
            }
            Err(e) => self.report(&e),
        }
        self.scroll_chat_to_bottom();
    }

    /// Abandon the streaming reply; nothing from it is saved
    pub fn cancel_turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            self.notify(format!("Reply in {} cancelled", turn.conversation_id()));
        }
    }

    pub fn tick(&mut self) {
        if self.is_streaming() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_chat_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
        self.follow_chat = false;
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_chat = false;
    }

    /// Text shown for the reply in progress
    pub fn streaming_text(&self) -> Option<String> {
        self.turn.as_ref().map(|turn| {
            if turn.text().is_empty() {
                format!("Thinking{}", ".".repeat(self.animation_frame as usize + 1))
            } else {
                turn.display_text()
            }
        })
    }

    /// Scroll so the newest message is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        let wrap_width = if self.chat_width > 0 { self.chat_width as usize } else { 50 };
        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };

        let count = |text: &str| -> u16 {
            text.split('\n')
                .map(|line| (line.chars().count() / wrap_width + 1) as u16)
                .sum()
        };

        let mut total_lines: u16 = 0;
        for msg in self.session.active_messages().iter().skip(1) {
            // Role line, content, blank line
            total_lines = total_lines.saturating_add(2 + count(&msg.content));
        }
        if let Some(text) = self.streaming_text() {
            total_lines = total_lines.saturating_add(2 + count(&text));
        }

        self.chat_scroll = total_lines.saturating_sub(visible_height);
        self.follow_chat = true;
    }
}

/// `<id>.txt` with path separators replaced
fn default_export_name(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}.txt", name.trim())
}

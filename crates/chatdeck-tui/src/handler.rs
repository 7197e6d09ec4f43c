use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crate::app::{App, InputMode, PromptKind};
use crate::input::TextInput;
use crate::tui::AppEvent;

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await,
        AppEvent::Paste(text) => match app.input_mode {
            InputMode::Editing => app.input.insert_str(&text),
            InputMode::Prompt(_) => app.prompt.insert_str(&text),
            _ => {}
        },
        AppEvent::Resize(_, _) => {
            if app.follow_chat {
                app.scroll_chat_to_bottom();
            }
        }
        AppEvent::Tick => app.tick(),
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key).await,
        InputMode::Editing => handle_editing_mode(app, key).await,
        InputMode::Prompt(kind) => handle_prompt(app, kind, key).await,
        InputMode::ConfirmDelete => handle_confirm_delete(app, key).await,
    }
}

/// Keys that change which conversations exist or which one is active
fn is_lifecycle_key(code: KeyCode) -> bool {
    matches!(
        code,
        KeyCode::Enter
            | KeyCode::Char('n')
            | KeyCode::Char('r')
            | KeyCode::Char('R')
            | KeyCode::Char('d')
            | KeyCode::Char('e')
            | KeyCode::Char('i')
    )
}

async fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    if app.is_streaming() && is_lifecycle_key(key.code) && !key.modifiers.contains(KeyModifiers::CONTROL) {
        app.notify_error("Wait for the reply to finish (Esc cancels it)");
        return;
    }

    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Sidebar navigation
        KeyCode::Char('j') | KeyCode::Down => app.sidebar_down(),
        KeyCode::Char('k') | KeyCode::Up => app.sidebar_up(),
        KeyCode::Enter => app.open_highlighted().await,

        // Chat scrolling
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_down(app.chat_height / 2);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_up(app.chat_height / 2);
        }
        KeyCode::PageDown => app.scroll_chat_down(app.chat_height),
        KeyCode::PageUp => app.scroll_chat_up(app.chat_height),
        KeyCode::Char('G') | KeyCode::End => app.scroll_chat_to_bottom(),

        // Conversation lifecycle
        KeyCode::Char('n') => app.new_conversation().await,
        KeyCode::Char('r') => app.start_prompt(PromptKind::Rename),
        KeyCode::Char('d') => app.start_delete(),
        KeyCode::Char('e') => app.start_prompt(PromptKind::Export),
        KeyCode::Char('i') => app.start_prompt(PromptKind::Import),
        KeyCode::Char('R') => app.reload_conversations().await,

        // Compose
        KeyCode::Char('a') | KeyCode::Tab => {
            app.input_mode = InputMode::Editing;
        }

        KeyCode::Esc => {
            if app.is_streaming() {
                app.cancel_turn();
            } else {
                app.notice = None;
            }
        }

        _ => {}
    }
}

async fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Tab => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => app.send_message().await,
        code => edit_text(&mut app.input, code),
    }
}

async fn handle_prompt(app: &mut App, kind: PromptKind, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.prompt.take();
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => app.submit_prompt(kind).await,
        code => edit_text(&mut app.prompt, code),
    }
}

async fn handle_confirm_delete(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') => app.confirm_delete().await,
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        _ => {}
    }
}

fn edit_text(input: &mut TextInput, code: KeyCode) {
    match code {
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.left(),
        KeyCode::Right => input.right(),
        KeyCode::Home => input.home(),
        KeyCode::End => input.end(),
        KeyCode::Char(c) => input.insert(c),
        _ => {}
    }
}

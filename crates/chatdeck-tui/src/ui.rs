use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use chatdeck_core::{Message, Role};
use crate::app::{App, InputMode};

/// Style `**bold**` and `` `code` `` spans in a line of assistant output
fn styled_reply_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let bold = rest.find("**");
        let code = rest.find('`');
        let (start, marker, style) = match (bold, code) {
            (Some(b), Some(c)) if c < b => (c, "`", Style::default().fg(Color::Green)),
            (Some(b), _) => (b, "**", Style::default().add_modifier(Modifier::BOLD)),
            (None, Some(c)) => (c, "`", Style::default().fg(Color::Green)),
            (None, None) => break,
        };

        let after = &rest[start + marker.len()..];
        let Some(end) = after.find(marker) else {
            // Unclosed marker, keep it literal
            break;
        };

        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(after[..end].to_string(), style));
        rest = &after[end + marker.len()..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }
    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(28),
        Constraint::Min(0),
    ])
    .areas(body_area);

    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(main_area);

    render_sidebar(app, frame, sidebar_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    match app.input_mode {
        InputMode::Prompt(kind) => render_prompt(app, frame, area, kind.title()),
        InputMode::ConfirmDelete => render_confirm_delete(app, frame, area),
        _ => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let streaming = if app.is_streaming() {
        Span::styled(" streaming ", Style::default().fg(Color::Yellow))
    } else {
        Span::raw("")
    };

    let title = Line::from(vec![
        Span::styled(" chatdeck ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("{} ", app.model), Style::default().fg(Color::White)),
        streaming,
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // A pending notice replaces the key hints until dismissed
    if let Some(notice) = &app.notice {
        let style = if notice.is_error {
            Style::default().bg(Color::Red).fg(Color::White)
        } else {
            Style::default().bg(Color::Green).fg(Color::Black)
        };
        let footer = Paragraph::new(format!(" {} ", notice.text)).style(style);
        frame.render_widget(footer, area);
        return;
    }

    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Editing => (" EDIT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        _ => (" CHAT ", Style::default().bg(Color::Blue).fg(Color::White)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let keys: &[(&str, &str)] = match (app.input_mode, app.is_streaming()) {
        (InputMode::Editing, _) => &[("Enter", "send"), ("Esc", "done")],
        (_, true) => &[("Esc", "cancel reply"), ("^d/^u", "scroll"), ("q", "quit")],
        _ => &[
            ("j/k", "move"),
            ("Enter", "open"),
            ("a", "write"),
            ("n", "new"),
            ("r", "rename"),
            ("d", "delete"),
            ("e/i", "export/import"),
            ("q", "quit"),
        ],
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::styled(" ", label_style)];
    for (key, label) in keys {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    let border_color = if app.input_mode == InputMode::Normal { Color::Cyan } else { Color::DarkGray };
    let active = app.session.active_id().to_string();

    let items: Vec<ListItem> = app
        .conversations
        .iter()
        .map(|id| {
            if *id == active {
                ListItem::new(format!("● {}", id)).style(Style::default().fg(Color::Cyan))
            } else {
                ListItem::new(format!("  {}", id))
            }
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(format!(" Conversations ({}) ", app.conversations.len())),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        );

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn message_lines(message: &Message, lines: &mut Vec<Line<'static>>) {
    match message.role {
        Role::User => {
            lines.push(Line::from(Span::styled(
                "You:",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )));
            for line in message.content.split('\n') {
                lines.push(Line::from(line.to_string()));
            }
        }
        Role::Assistant => {
            let label = if message.incomplete { "AI (incomplete):" } else { "AI:" };
            lines.push(Line::from(Span::styled(
                label,
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            for line in message.content.split('\n') {
                lines.push(styled_reply_line(line));
            }
        }
        Role::System => return,
    }
    lines.push(Line::default());
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    if app.follow_chat {
        app.scroll_chat_to_bottom();
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" {} ", app.session.active_id()));

    let messages = app.session.active_messages();
    let streaming = app.streaming_text();

    let text = if messages.iter().all(|m| m.role == Role::System) && streaming.is_none() {
        Text::from(Span::styled(
            "No messages yet. Press a to start writing.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();
        for message in messages {
            message_lines(message, &mut lines);
        }

        if let Some(partial) = streaming {
            lines.push(Line::from(Span::styled(
                "AI:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            for line in partial.split('\n') {
                lines.push(styled_reply_line(line));
            }
        }
        Text::from(lines)
    };

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Message (a to write, Enter to send) ");

    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible_text, cursor_col) = app.input.visible(inner_width);

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if editing {
        frame.set_cursor_position((area.x + cursor_col as u16 + 1, area.y + 1));
    }
}

/// Centered popup of the given size, clamped to `area`
fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_prompt(app: &App, frame: &mut Frame, area: Rect, title: &str) {
    let popup = popup_area(area, 60, 5);
    frame.render_widget(Clear, popup);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(title.to_string());
    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let (visible_text, cursor_col) = app.prompt.visible(inner.width as usize);
    let input_area = Rect::new(inner.x, inner.y, inner.width, 1);
    frame.render_widget(Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan)), input_area);
    frame.set_cursor_position((input_area.x + cursor_col as u16, input_area.y));

    let hint = Paragraph::new("Enter to confirm, Esc to cancel").style(Style::default().fg(Color::DarkGray));
    frame.render_widget(hint, Rect::new(inner.x, inner.y + 2, inner.width, 1));
}

fn render_confirm_delete(app: &App, frame: &mut Frame, area: Rect) {
    let popup = popup_area(area, 50, 5);
    frame.render_widget(Clear, popup);

    let id = app.highlighted().unwrap_or_default();
    let body = Text::from(vec![
        Line::from(format!("Delete \"{}\" and all its messages?", id)),
        Line::default(),
        Line::from(Span::styled("y to delete, n to keep", Style::default().fg(Color::DarkGray))),
    ]);

    let dialog = Paragraph::new(body)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title(" Delete conversation "),
        );
    frame.render_widget(dialog, popup);
}

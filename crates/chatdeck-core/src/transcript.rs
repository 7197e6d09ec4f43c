//! Plain-text transcripts
//!
//! One message per line as `role: content`. Only user and assistant messages
//! are written; multi-line content cannot be represented.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::state::{Message, Role};

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(user|assistant):\s*(.*)$").expect("valid transcript pattern"))
}

/// A transcript line that was not imported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIssue {
    /// 1-based line number
    pub line: usize,
    pub text: String,
}

impl fmt::Display for LineIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: not a 'user:' or 'assistant:' line: {}", self.line, self.text)
    }
}

#[derive(Debug, Default)]
pub struct Decoded {
    pub messages: Vec<Message>,
    pub skipped: Vec<LineIssue>,
}

pub fn encode(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a transcript. Bad lines are reported and skipped; blank lines are ignored.
pub fn decode(text: &str) -> Decoded {
    let mut decoded = Decoded::default();

    for (idx, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }

        match line_pattern().captures(raw) {
            Some(caps) => {
                let role = match &caps[1] {
                    "user" => Role::User,
                    _ => Role::Assistant,
                };
                decoded.messages.push(Message::new(role, &caps[2]));
            }
            None => decoded.skipped.push(LineIssue {
                line: idx + 1,
                text: raw.to_string(),
            }),
        }
    }

    decoded
}

/// Single-line text field with a character-based cursor
#[derive(Debug, Default, Clone)]
pub struct TextInput {
    value: String,
    /// Cursor position in characters, not bytes
    cursor: usize,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

impl TextInput {
    pub fn with_value(value: &str) -> Self {
        Self {
            value: value.to_string(),
            cursor: value.chars().count(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.value, self.cursor);
        self.value.insert(byte_pos, c);
        self.cursor += 1;
    }

    /// Insert pasted text; newlines become spaces since messages are single-line
    pub fn insert_str(&mut self, text: &str) {
        for c in text.chars() {
            self.insert(if c == '\n' || c == '\r' { ' ' } else { c });
        }
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.value.chars().count() {
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.value.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.value.chars().count();
    }

    /// Take the text out, leaving the field empty
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.value)
    }

    /// The slice that fits in `width` columns with the cursor visible, and the
    /// cursor's column within it
    pub fn visible(&self, width: usize) -> (String, usize) {
        let offset = if width == 0 || self.cursor < width {
            0
        } else {
            self.cursor - width + 1
        };
        let text = self.value.chars().skip(offset).take(width).collect();
        (text, self.cursor - offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editing_multibyte_text() {
        let mut input = TextInput::default();
        for c in "你好ab".chars() {
            input.insert(c);
        }
        input.left();
        input.left();
        input.backspace();
        assert_eq!(input.value(), "你ab");
        assert_eq!(input.cursor(), 1);

        input.delete();
        assert_eq!(input.value(), "你b");
        input.end();
        input.insert('!');
        assert_eq!(input.value(), "你b!");
    }

    #[test]
    fn test_paste_flattens_newlines() {
        let mut input = TextInput::default();
        input.insert_str("one\ntwo");
        assert_eq!(input.take(), "one two");
        assert!(input.is_empty());
        assert_eq!(input.cursor(), 0);
    }

    #[test]
    fn test_visible_scrolls_with_cursor() {
        let input = TextInput::with_value("abcdefgh");
        let (text, col) = input.visible(4);
        assert_eq!(text, "fgh");
        assert_eq!(col, 3);

        let mut input = input;
        input.home();
        assert_eq!(input.visible(4), ("abcd".to_string(), 0));
    }
}

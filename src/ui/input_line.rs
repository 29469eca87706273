//! Editable command buffer with a character-offset cursor.
//!
//! Multi-line: Alt+Enter inserts a newline, plain Enter is left to the caller.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Default)]
pub struct InputLine {
    content: String,
    /// Cursor position as a character offset (0 = before first char).
    cursor: usize,
}

impl InputLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.cursor = 0;
    }

    pub fn set_content(&mut self, text: &str) {
        self.content = text.to_string();
        self.cursor = self.content.chars().count();
    }

    /// Trimmed content if non-empty, clearing the buffer. Whitespace-only
    /// input is left untouched and yields `None`.
    pub fn take(&mut self) -> Option<String> {
        let text = self.content.trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.clear();
        Some(text)
    }

    /// Bare `\r` is dropped; only Enter submits.
    pub fn insert_char(&mut self, ch: char) {
        if ch == '\r' {
            return;
        }
        let at = self.byte_offset();
        self.content.insert(at, ch);
        self.cursor += 1;
    }

    /// Normalizes `\r\n` to `\n` and strips bare `\r`.
    pub fn insert_str(&mut self, s: &str) {
        let clean = s.replace("\r\n", "\n").replace('\r', "");
        let at = self.byte_offset();
        self.content.insert_str(at, &clean);
        self.cursor += clean.chars().count();
    }

    pub fn delete_back(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        self.remove_at_cursor();
    }

    pub fn delete_forward(&mut self) {
        self.remove_at_cursor();
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor < self.content.chars().count() {
            self.cursor += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.content.chars().count();
    }

    /// Ctrl+W / Ctrl+Backspace.
    pub fn delete_word_back(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let chars: Vec<char> = self.content.chars().collect();
        let mut pos = self.cursor;
        while pos > 0 && chars[pos - 1].is_whitespace() {
            pos -= 1;
        }
        while pos > 0 && !chars[pos - 1].is_whitespace() {
            pos -= 1;
        }
        let start = self.char_to_byte(pos);
        let end = self.byte_offset();
        self.content.replace_range(start..end, "");
        self.cursor = pos;
    }

    /// Returns `true` if the key edited the buffer or moved the cursor.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        match key.code {
            KeyCode::Enter if alt => {
                self.insert_char('\n');
                true
            }
            KeyCode::Char('w') if ctrl => {
                self.delete_word_back();
                true
            }
            KeyCode::Backspace if ctrl => {
                self.delete_word_back();
                true
            }
            // Other control chords belong to the app.
            KeyCode::Char(_) if ctrl => false,
            KeyCode::Char(ch) => {
                self.insert_char(ch);
                true
            }
            KeyCode::Backspace => {
                self.delete_back();
                true
            }
            KeyCode::Delete => {
                self.delete_forward();
                true
            }
            KeyCode::Left => {
                self.move_left();
                true
            }
            KeyCode::Right => {
                self.move_right();
                true
            }
            KeyCode::Home => {
                self.move_home();
                true
            }
            KeyCode::End => {
                self.move_end();
                true
            }
            _ => false,
        }
    }

    /// (row, column) of the cursor, counting explicit newlines only.
    pub fn cursor_row_col(&self) -> (usize, usize) {
        let before: String = self.content.chars().take(self.cursor).collect();
        let row = before.matches('\n').count();
        let col = before
            .rsplit('\n')
            .next()
            .map(|line| line.chars().count())
            .unwrap_or(0);
        (row, col)
    }

    fn remove_at_cursor(&mut self) {
        let at = self.byte_offset();
        if let Some(ch) = self.content[at..].chars().next() {
            self.content.replace_range(at..at + ch.len_utf8(), "");
        }
    }

    fn byte_offset(&self) -> usize {
        self.char_to_byte(self.cursor)
    }

    fn char_to_byte(&self, char_pos: usize) -> usize {
        self.content
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn editing_keeps_cursor_consistent() {
        let mut il = InputLine::new();
        il.insert_str("héllo");
        assert_eq!(il.cursor(), 5);
        il.move_left();
        il.delete_back();
        assert_eq!(il.content(), "hélo");
        il.move_home();
        il.delete_forward();
        assert_eq!(il.content(), "élo");
        il.move_end();
        il.delete_forward();
        assert_eq!(il.content(), "élo");
    }

    #[test]
    fn take_trims_and_ignores_blank() {
        let mut il = InputLine::new();
        il.set_content("   ");
        assert_eq!(il.take(), None);
        assert_eq!(il.content(), "   ");
        il.set_content("  open notepad \n");
        assert_eq!(il.take().as_deref(), Some("open notepad"));
        assert_eq!(il.content(), "");
        assert_eq!(il.cursor(), 0);
    }

    #[test]
    fn word_delete_and_newlines() {
        let mut il = InputLine::new();
        il.insert_str("click the  ");
        il.delete_word_back();
        assert_eq!(il.content(), "click ");

        assert!(il.handle_key(key(KeyCode::Enter, KeyModifiers::ALT)));
        il.insert_str("ok");
        assert_eq!(il.content(), "click \nok");
        assert_eq!(il.cursor_row_col(), (1, 2));

        assert!(!il.handle_key(key(KeyCode::Enter, KeyModifiers::NONE)));
        assert!(!il.handle_key(key(KeyCode::Char('l'), KeyModifiers::CONTROL)));
        assert_eq!(il.content(), "click \nok");
    }

    #[test]
    fn carriage_returns_are_normalized() {
        let mut il = InputLine::new();
        il.insert_char('\r');
        il.insert_str("a\r\nb\rc");
        assert_eq!(il.content(), "a\nbc");
    }
}

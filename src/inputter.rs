use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::trace;

use crate::service::Decision;

/// Single line editor used by the command line. Positions count chars, not bytes.
#[derive(Default)]
pub struct Inputter {
    current_input: String,
    cursor_pos: usize,
    finished: bool,
    canceled: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InputResult {
    pub input: String,
    pub finished: bool,
    pub canceled: bool,
    pub cursor_pos: usize,
}

impl InputResult {
    /// Parses the input as a 1-based record number and returns the 0-based index.
    pub fn as_index(&self) -> Option<usize> {
        self.input
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
    }

    pub fn as_decision(&self) -> Option<Decision> {
        let label = self.input.trim();
        (!label.is_empty()).then(|| Decision::new(label))
    }
}

impl Inputter {
    pub fn read(&mut self, key: KeyEvent) -> InputResult {
        match key.code {
            KeyCode::Enter => self.finished = true,
            KeyCode::Esc => {
                self.clear();
                self.canceled = true;
                self.finished = true;
            }
            KeyCode::Backspace => {
                if self.cursor_pos > 0 {
                    self.cursor_pos -= 1;
                    self.current_input.remove(self.byte_pos());
                }
            }
            KeyCode::Delete => {
                if self.cursor_pos < self.char_count() {
                    self.current_input.remove(self.byte_pos());
                }
            }
            KeyCode::Left => self.cursor_pos = self.cursor_pos.saturating_sub(1),
            KeyCode::Right => self.cursor_pos = std::cmp::min(self.cursor_pos + 1, self.char_count()),
            KeyCode::Home => self.cursor_pos = 0,
            KeyCode::End => self.cursor_pos = self.char_count(),
            KeyCode::Char(chr) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.current_input.insert(self.byte_pos(), chr);
                self.cursor_pos += 1;
            }
            other => trace!("Ignoring {other:?} in command input"),
        }
        self.get()
    }

    pub fn get(&self) -> InputResult {
        InputResult {
            canceled: self.canceled,
            finished: self.finished,
            input: self.current_input.clone(),
            cursor_pos: self.cursor_pos,
        }
    }

    pub fn clear(&mut self) {
        self.canceled = false;
        self.finished = false;
        self.current_input.clear();
        self.cursor_pos = 0;
    }

    fn char_count(&self) -> usize {
        self.current_input.chars().count()
    }

    fn byte_pos(&self) -> usize {
        self.current_input
            .char_indices()
            .nth(self.cursor_pos)
            .map(|(byte_idx, _)| byte_idx)
            .unwrap_or(self.current_input.len())
    }
}

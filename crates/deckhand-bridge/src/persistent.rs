//! Keystroke relay for multiplexer-backed sessions.
//!
//! The multiplexer has its own scroll mode, entered with a control byte and
//! left with Escape. [`PersistentRelay`] turns scroll gestures into that
//! mode's key sequences, makes sure ordinary typing always leaves scroll mode
//! first, and runs every keystroke through a [`LineEditor`] so command lines
//! typed inside the multiplexed shell can still be classified.

use deckhand_core::{EscapeScanner, Token};
use tracing::debug;

const ESC: &str = "\x1b";
const SCROLL_UP_KEY: char = 'k';
const SCROLL_DOWN_KEY: char = 'j';
/// Most screens a single wheel event may scroll.
const MAX_WHEEL_PAGES: usize = 4;

/// A scroll request from the front end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollGesture {
    /// Shift+PageUp or Ctrl/Alt/Cmd+Up: one screen up.
    PageUp,
    /// Shift+PageDown or Ctrl/Alt/Cmd+Down: one screen down.
    PageDown,
    /// Mouse wheel, in pixels. Negative scrolls up.
    Wheel { delta_y: f64 },
}

impl ScrollGesture {
    /// Recognise a gesture when an input event is exactly one of the xterm
    /// encodings for it.
    pub fn from_input(data: &str) -> Option<Self> {
        match data {
            "\x1b[5;2~" | "\x1b[1;5A" | "\x1b[1;3A" | "\x1b[1;9A" => Some(Self::PageUp),
            "\x1b[6;2~" | "\x1b[1;5B" | "\x1b[1;3B" | "\x1b[1;9B" => Some(Self::PageDown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollConfig {
    /// Key that enters the multiplexer's scroll mode.
    pub enter_key: char,
    pub pixels_per_line: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            enter_key: '\x13',
            pixels_per_line: 40.0,
        }
    }
}

/// Input forwarded to a persistent session, plus any command lines it
/// completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayedInput {
    pub bytes: String,
    pub submitted: Vec<String>,
}

/// Per-session relay state. Lives as long as a surface is attached.
#[derive(Debug, Clone)]
pub struct PersistentRelay {
    scroll_active: bool,
    wheel_remainder: f64,
    editor: LineEditor,
    config: ScrollConfig,
}

impl PersistentRelay {
    pub fn new(config: ScrollConfig) -> Self {
        Self {
            scroll_active: false,
            wheel_remainder: 0.0,
            editor: LineEditor::default(),
            config,
        }
    }

    pub fn is_scrolling(&self) -> bool {
        self.scroll_active
    }

    /// Translate a gesture into multiplexer input. `rows` is one screen.
    /// Returns `None` when nothing should be sent.
    pub fn scroll(&mut self, gesture: ScrollGesture, rows: u16) -> Option<String> {
        let page = usize::from(rows.max(1));
        match gesture {
            ScrollGesture::PageUp => Some(self.scroll_up(page)),
            ScrollGesture::PageDown => self.scroll_down(page),
            ScrollGesture::Wheel { delta_y } => {
                if !delta_y.is_finite() {
                    return None;
                }
                let ppl = if self.config.pixels_per_line > 0.0 {
                    self.config.pixels_per_line
                } else {
                    1.0
                };
                let total = self.wheel_remainder + delta_y / ppl;
                let lines = total.trunc();
                self.wheel_remainder = total - lines;
                let max = (page * MAX_WHEEL_PAGES) as f64;
                if lines.abs() > max {
                    self.wheel_remainder = 0.0;
                }
                let count = lines.abs().min(max) as usize;
                if lines < 0.0 {
                    Some(self.scroll_up(count))
                } else if lines > 0.0 {
                    let out = self.scroll_down(count);
                    if out.is_none() {
                        self.wheel_remainder = 0.0;
                    }
                    out
                } else {
                    None
                }
            }
        }
    }

    fn scroll_up(&mut self, lines: usize) -> String {
        let mut out = String::with_capacity(lines + 1);
        if !self.scroll_active {
            out.push(self.config.enter_key);
            self.scroll_active = true;
            debug!("entering multiplexer scroll mode");
        }
        out.extend(std::iter::repeat(SCROLL_UP_KEY).take(lines));
        out
    }

    fn scroll_down(&mut self, lines: usize) -> Option<String> {
        if !self.scroll_active {
            return None;
        }
        Some(std::iter::repeat(SCROLL_DOWN_KEY).take(lines).collect())
    }

    /// Relay ordinary keystrokes. Leaves scroll mode first if it is active.
    pub fn input(&mut self, data: &str) -> RelayedInput {
        let mut bytes = String::with_capacity(data.len() + 1);
        if self.scroll_active {
            self.scroll_active = false;
            self.wheel_remainder = 0.0;
            debug!("leaving multiplexer scroll mode");
            bytes.push_str(ESC);
            if data == ESC {
                return RelayedInput {
                    bytes,
                    submitted: Vec::new(),
                };
            }
        }
        bytes.push_str(data);
        RelayedInput {
            bytes,
            submitted: self.editor.feed(data),
        }
    }

    /// Forget scroll state and the partial line (surface detached).
    pub fn reset(&mut self) {
        self.scroll_active = false;
        self.wheel_remainder = 0.0;
        self.editor = LineEditor::default();
    }
}

/// Minimal readline model: enough to recover the line a user submitted.
#[derive(Debug, Clone, Default)]
pub struct LineEditor {
    line: String,
}

impl LineEditor {
    /// Feed one input event; returns the non-empty lines it submitted.
    pub fn feed(&mut self, data: &str) -> Vec<String> {
        let mut scanner = EscapeScanner::new();
        let mut submitted = Vec::new();
        let tokens = data
            .chars()
            .filter_map(|c| scanner.push(c))
            .collect::<Vec<_>>()
            .into_iter()
            .chain(scanner.finish());
        for token in tokens {
            match token {
                Token::Text(c) => self.line.push(c),
                Token::Control('\x7f' | '\x08') => {
                    self.line.pop();
                }
                Token::Control('\x15' | '\x03') => self.line.clear(),
                Token::Control('\x17') => self.delete_word(),
                Token::Control('\r' | '\n') => {
                    let line = std::mem::take(&mut self.line);
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        submitted.push(trimmed.to_string());
                    }
                }
                _ => {}
            }
        }
        submitted
    }

    pub fn pending(&self) -> &str {
        &self.line
    }

    fn delete_word(&mut self) {
        let kept = self.line.trim_end().len();
        self.line.truncate(kept);
        let start = self
            .line
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        self.line.truncate(start);
    }
}

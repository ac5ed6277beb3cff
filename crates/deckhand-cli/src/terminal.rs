//! Terminal utilities: raw mode, size, and keyboard input.
//!
//! Wraps crossterm's terminal operations and provides a RAII guard that
//! restores the terminal state on drop. Key events are translated to the
//! byte sequences a PTY expects, including the xterm modifier encodings the
//! persistent-session relay treats as scroll gestures.

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// RAII guard that restores the terminal to its original mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enter raw terminal mode.
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Current terminal size as (columns, rows), or (80, 24) if unknown.
pub fn get_terminal_size() -> (u16, u16) {
    terminal::size().unwrap_or((80, 24))
}

/// Something the user did at the local terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermInput {
    /// Bytes to send to the session.
    Data(String),
    Resize(u16, u16),
    /// Ctrl+]: leave the session.
    Detach,
}

/// Read terminal events on a blocking thread until the receiver goes away
/// or Ctrl+] is pressed.
pub fn spawn_reader(tx: mpsc::Sender<TermInput>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || loop {
        let input = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                if is_detach(&key) {
                    let _ = tx.blocking_send(TermInput::Detach);
                    break;
                }
                match key_event_to_input(&key) {
                    Some(data) => TermInput::Data(data),
                    None => continue,
                }
            }
            Ok(Event::Paste(text)) => TermInput::Data(text),
            Ok(Event::Resize(cols, rows)) => TermInput::Resize(cols, rows),
            Ok(_) => continue,
            Err(e) => {
                warn!("terminal event error: {e}");
                break;
            }
        };
        if tx.blocking_send(input).is_err() {
            break;
        }
    })
}

fn is_detach(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(']')
}

/// xterm modifier parameter for a key event (`2` = Shift, `3` = Alt,
/// `5` = Ctrl, `9` = Super), if any modifier is held.
fn modifier_param(modifiers: KeyModifiers) -> Option<u8> {
    if modifiers.contains(KeyModifiers::SUPER) {
        Some(9)
    } else if modifiers.contains(KeyModifiers::CONTROL) {
        Some(5)
    } else if modifiers.contains(KeyModifiers::ALT) {
        Some(3)
    } else if modifiers.contains(KeyModifiers::SHIFT) {
        Some(2)
    } else {
        None
    }
}

/// Convert a key event to the input a PTY expects.
pub fn key_event_to_input(event: &KeyEvent) -> Option<String> {
    let modifier = modifier_param(event.modifiers);
    let s = match event.code {
        KeyCode::Char(c) => {
            if event.modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() {
                let byte = (c.to_ascii_lowercase() as u8) - b'a' + 1;
                return Some(char::from(byte).to_string());
            }
            if event.modifiers.contains(KeyModifiers::ALT) {
                return Some(format!("\x1b{c}"));
            }
            c.to_string()
        }
        KeyCode::Enter => "\r".into(),
        KeyCode::Backspace => "\x7f".into(),
        KeyCode::Tab => "\t".into(),
        KeyCode::BackTab => "\x1b[Z".into(),
        KeyCode::Esc => "\x1b".into(),
        KeyCode::Up | KeyCode::Down | KeyCode::Right | KeyCode::Left => {
            let letter = match event.code {
                KeyCode::Up => 'A',
                KeyCode::Down => 'B',
                KeyCode::Right => 'C',
                _ => 'D',
            };
            match modifier {
                Some(m) => format!("\x1b[1;{m}{letter}"),
                None => format!("\x1b[{letter}"),
            }
        }
        KeyCode::Home => "\x1b[H".into(),
        KeyCode::End => "\x1b[F".into(),
        KeyCode::PageUp => tilde_key(5, modifier),
        KeyCode::PageDown => tilde_key(6, modifier),
        KeyCode::Insert => "\x1b[2~".into(),
        KeyCode::Delete => "\x1b[3~".into(),
        KeyCode::F(n) => {
            let seq = match n {
                1 => "\x1bOP",
                2 => "\x1bOQ",
                3 => "\x1bOR",
                4 => "\x1bOS",
                5 => "\x1b[15~",
                6 => "\x1b[17~",
                7 => "\x1b[18~",
                8 => "\x1b[19~",
                9 => "\x1b[20~",
                10 => "\x1b[21~",
                11 => "\x1b[23~",
                12 => "\x1b[24~",
                _ => return None,
            };
            seq.into()
        }
        _ => return None,
    };
    Some(s)
}

fn tilde_key(code: u8, modifier: Option<u8>) -> String {
    match modifier {
        Some(m) => format!("\x1b[{code};{m}~"),
        None => format!("\x1b[{code}~"),
    }
}

//! Escape-sequence lexer.
//!
//! A small state machine over a character stream that separates printable
//! text and control characters from CSI, OSC, DCS and short ESC sequences.
//! It backs the replay sanitizer, the persistent-session line editor and the
//! shell-integration scan over session output.

/// Longest payload kept for a single sequence. Longer payloads are still
/// consumed but truncated.
const MAX_SEQUENCE_LEN: usize = 4096;

const ESC: char = '\x1b';
const BEL: char = '\x07';
const CAN: char = '\x18';
const SUB: char = '\x1a';
/// 8-bit string terminator.
const ST: char = '\u{9c}';

/// One lexical unit of terminal input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A printable character.
    Text(char),
    /// A control character outside any sequence (C0, DEL, C1, or a lone ESC).
    Control(char),
    /// `ESC [ params final`.
    Csi { params: String, final_byte: char },
    /// `ESC ] payload (BEL | ESC \)`.
    Osc(String),
    /// `ESC P payload ESC \`.
    Dcs(String),
    /// Any other escape: the characters following ESC (`7`, `(B`, `OA`, ...).
    Escape(String),
}

#[derive(Debug, Clone, Default)]
enum State {
    #[default]
    Ground,
    Escape,
    Intermediate(String),
    Ss3,
    Csi(String),
    Osc(String),
    OscEscape(String),
    Dcs(String),
    DcsEscape(String),
}

/// Incremental lexer. Feed characters with [`push`](Self::push); state
/// carries across calls so sequences split between chunks are reassembled.
#[derive(Debug, Clone, Default)]
pub struct EscapeScanner {
    state: State,
}

impl EscapeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the scanner is in the middle of a sequence.
    pub fn is_pending(&self) -> bool {
        !matches!(self.state, State::Ground)
    }

    /// Advance by one character, returning a token when one completes.
    pub fn push(&mut self, c: char) -> Option<Token> {
        match std::mem::take(&mut self.state) {
            State::Ground => {
                if c == ESC {
                    self.state = State::Escape;
                    None
                } else if c.is_control() {
                    Some(Token::Control(c))
                } else {
                    Some(Token::Text(c))
                }
            }
            State::Escape => match c {
                '[' => {
                    self.state = State::Csi(String::new());
                    None
                }
                ']' => {
                    self.state = State::Osc(String::new());
                    None
                }
                'P' => {
                    self.state = State::Dcs(String::new());
                    None
                }
                'O' => {
                    self.state = State::Ss3;
                    None
                }
                ESC => {
                    // ESC ESC: the first one stands alone.
                    self.state = State::Escape;
                    Some(Token::Control(ESC))
                }
                '\x20'..='\x2f' => {
                    self.state = State::Intermediate(c.to_string());
                    None
                }
                _ if c.is_control() => Some(Token::Control(c)),
                _ => Some(Token::Escape(c.to_string())),
            },
            State::Intermediate(mut seq) => {
                if ('\x20'..='\x2f').contains(&c) {
                    push_capped(&mut seq, c);
                    self.state = State::Intermediate(seq);
                    None
                } else {
                    seq.push(c);
                    Some(Token::Escape(seq))
                }
            }
            State::Ss3 => Some(Token::Escape(format!("O{c}"))),
            State::Csi(mut params) => match c {
                // Linux console function keys: ESC [ [ A
                '[' if params.is_empty() => {
                    params.push(c);
                    self.state = State::Csi(params);
                    None
                }
                '\x40'..='\x7e' => Some(Token::Csi {
                    params,
                    final_byte: c,
                }),
                ESC => {
                    self.state = State::Escape;
                    None
                }
                CAN | SUB => None,
                // C0 controls execute without ending the sequence.
                '\0'..='\x1f' => {
                    self.state = State::Csi(params);
                    Some(Token::Control(c))
                }
                _ => {
                    push_capped(&mut params, c);
                    self.state = State::Csi(params);
                    None
                }
            },
            State::Osc(mut payload) => match c {
                BEL | ST => Some(Token::Osc(payload)),
                ESC => {
                    self.state = State::OscEscape(payload);
                    None
                }
                CAN | SUB => None,
                _ => {
                    push_capped(&mut payload, c);
                    self.state = State::Osc(payload);
                    None
                }
            },
            State::OscEscape(payload) => {
                if c == '\\' {
                    Some(Token::Osc(payload))
                } else {
                    // Unterminated OSC interrupted by a new escape.
                    self.state = State::Escape;
                    self.push(c)
                }
            }
            State::Dcs(mut payload) => match c {
                ST => Some(Token::Dcs(payload)),
                ESC => {
                    self.state = State::DcsEscape(payload);
                    None
                }
                CAN | SUB => None,
                _ => {
                    push_capped(&mut payload, c);
                    self.state = State::Dcs(payload);
                    None
                }
            },
            State::DcsEscape(payload) => {
                if c == '\\' {
                    Some(Token::Dcs(payload))
                } else {
                    self.state = State::Escape;
                    self.push(c)
                }
            }
        }
    }

    /// End of input. A lone pending ESC is returned as a control token;
    /// any other unterminated sequence is dropped.
    pub fn finish(&mut self) -> Option<Token> {
        match std::mem::take(&mut self.state) {
            State::Escape => Some(Token::Control(ESC)),
            _ => None,
        }
    }

    /// Lex a chunk without finishing, keeping partial sequences pending.
    pub fn feed(&mut self, chunk: &str) -> Vec<Token> {
        chunk.chars().filter_map(|c| self.push(c)).collect()
    }

    /// Scan a chunk of output for shell-integration marks.
    pub fn feed_marks(&mut self, chunk: &str) -> Vec<ShellMark> {
        let mut marks = Vec::new();
        for c in chunk.chars() {
            if let Some(Token::Osc(payload)) = self.push(c) {
                if let Some(mark) = ShellMark::parse(&payload) {
                    marks.push(mark);
                }
            }
        }
        marks
    }
}

fn push_capped(buf: &mut String, c: char) {
    if buf.len() < MAX_SEQUENCE_LEN {
        buf.push(c);
    }
}

/// Lex a complete input, dropping unterminated trailing sequences.
pub fn tokens(input: &str) -> Vec<Token> {
    let mut scanner = EscapeScanner::new();
    let mut out = scanner.feed(input);
    out.extend(scanner.finish());
    out
}

/// Strip escape sequences and control characters so the text can be
/// treated as plain keystrokes. Carriage return, line feed, tab and DEL
/// (the backspace key) are kept.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for token in tokens(input) {
        match token {
            Token::Text(c) => out.push(c),
            Token::Control(c @ ('\r' | '\n' | '\t' | '\x7f')) => out.push(c),
            _ => {}
        }
    }
    out
}

/// Shell-integration mark emitted by prompt hooks as `OSC 1337;Key=Value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMark {
    /// The command about to run; empty when the prompt is redrawn.
    Command(String),
    /// The shell's working directory.
    CurrentDir(String),
}

impl ShellMark {
    /// Parse an OSC payload such as `1337;Command=codex`.
    pub fn parse(payload: &str) -> Option<Self> {
        let rest = payload.strip_prefix("1337;")?;
        if let Some(cmd) = rest.strip_prefix("Command=") {
            Some(ShellMark::Command(cmd.trim().to_string()))
        } else {
            rest.strip_prefix("CurrentDir=")
                .map(|dir| ShellMark::CurrentDir(dir.to_string()))
        }
    }
}

/// Collect shell-integration marks from a complete string.
pub fn shell_marks(input: &str) -> Vec<ShellMark> {
    EscapeScanner::new().feed_marks(input)
}

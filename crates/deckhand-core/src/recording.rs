//! Recording wire format.
//!
//! A recording is stored as newline-delimited JSON: one `meta` line followed
//! by one `input` line per keystroke event, in arrival order.

use crate::error::{DeckError, DeckResult};
use serde::{Deserialize, Serialize};

/// Current recording schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Longest recording id kept after sanitizing.
const MAX_RECORDING_ID_LEN: usize = 120;

/// Where a write to a session came from. Only user keystrokes are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    User,
    System,
}

/// Metadata written at the head of every recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMeta {
    pub schema_version: u32,
    /// Epoch milliseconds.
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub project_id: String,
    pub session_persist_id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_command: Option<String>,
}

/// One recorded input event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingEvent {
    /// Milliseconds since the recording started.
    pub t: u64,
    pub data: String,
}

/// A single line of a recording file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RecordingLine {
    Meta(RecordingMeta),
    Input(RecordingEvent),
}

/// A complete recording as loaded from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub recording_id: String,
    pub meta: Option<RecordingMeta>,
    pub events: Vec<RecordingEvent>,
}

/// Listing entry: id and metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub recording_id: String,
    pub meta: Option<RecordingMeta>,
}

/// Restrict a recording id to characters safe for a file name.
pub fn sanitize_recording_id(input: &str) -> String {
    let trimmed = input.trim();
    let out: String = trimmed
        .chars()
        .take(MAX_RECORDING_ID_LEN)
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "recording".to_string()
    } else {
        out
    }
}

/// Serialize a recording as JSONL: the meta line, then every event.
pub fn encode_jsonl(meta: &RecordingMeta, events: &[RecordingEvent]) -> DeckResult<String> {
    let mut out = serde_json::to_string(&RecordingLine::Meta(meta.clone()))?;
    out.push('\n');
    for event in events {
        out.push_str(&serde_json::to_string(&RecordingLine::Input(event.clone()))?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a JSONL recording. The first meta line wins; events must have
/// non-decreasing timestamps.
pub fn decode_jsonl(
    content: &str,
) -> DeckResult<(Option<RecordingMeta>, Vec<RecordingEvent>)> {
    let mut meta = None;
    let mut events: Vec<RecordingEvent> = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: RecordingLine = serde_json::from_str(trimmed)
            .map_err(|e| DeckError::Codec(format!("line {}: {e}", lineno + 1)))?;
        match parsed {
            RecordingLine::Meta(m) => {
                if meta.is_none() {
                    meta = Some(m);
                }
            }
            RecordingLine::Input(ev) => {
                if let Some(prev) = events.last() {
                    if ev.t < prev.t {
                        return Err(DeckError::Codec(format!(
                            "line {}: timestamp {} before {}",
                            lineno + 1,
                            ev.t,
                            prev.t
                        )));
                    }
                }
                events.push(ev);
            }
        }
    }
    Ok((meta, events))
}

/// Parse only the leading meta line, for listings.
pub fn decode_meta(content: &str) -> Option<RecordingMeta> {
    let first = content.lines().find(|l| !l.trim().is_empty())?;
    match serde_json::from_str::<RecordingLine>(first.trim()) {
        Ok(RecordingLine::Meta(m)) => Some(m),
        _ => None,
    }
}

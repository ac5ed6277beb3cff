//! Replay steps and flow grouping.
//!
//! A step is one line-terminated (or final unterminated) unit of sanitized
//! input: exactly what the user submitted in one logical action. Flow groups
//! are the display view of a recording: raw events sharing a timestamp.

use crate::escape::sanitize;
use crate::recording::RecordingEvent;

/// Preview shown for a group that only submits an empty line.
pub const BARE_NEWLINE_PREVIEW: &str = "⏎";

/// Split a recording into replayable steps.
///
/// Each event is sanitized, the results are concatenated, and the buffer is
/// cut after every `\r` or `\n`. A non-terminated remainder becomes the
/// final step.
pub fn split_steps(events: &[RecordingEvent]) -> Vec<String> {
    let buffer: String = events.iter().map(|e| sanitize(&e.data)).collect();
    let mut steps = Vec::new();
    let mut rest = buffer.as_str();
    while let Some(pos) = rest.find(['\r', '\n']) {
        let (step, tail) = rest.split_at(pos + 1);
        steps.push(step.to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        steps.push(rest.to_string());
    }
    steps
}

/// Consecutive events recorded at the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowGroup {
    pub t: u64,
    /// Index of the group's first event in the recording.
    pub first_event: usize,
    pub event_count: usize,
    /// Raw concatenated data of the group's events.
    pub data: String,
    pub preview: String,
}

/// Group consecutive events that share a timestamp.
pub fn group_flow(events: &[RecordingEvent]) -> Vec<FlowGroup> {
    let mut groups: Vec<FlowGroup> = Vec::new();
    for (idx, event) in events.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if group.t == event.t => {
                group.event_count += 1;
                group.data.push_str(&event.data);
            }
            _ => groups.push(FlowGroup {
                t: event.t,
                first_event: idx,
                event_count: 1,
                data: event.data.clone(),
                preview: String::new(),
            }),
        }
    }
    for group in &mut groups {
        group.preview = preview(&group.data);
    }
    groups
}

fn preview(data: &str) -> String {
    let clean = sanitize(data);
    if let Some(line) = clean
        .split(['\r', '\n'])
        .map(str::trim)
        .find(|l| !l.is_empty())
    {
        return line.to_string();
    }
    if clean.contains(['\r', '\n']) {
        BARE_NEWLINE_PREVIEW.to_string()
    } else {
        String::new()
    }
}

/// Split a step into its body and the number of line terminators in its
/// trailing run. `\r\n` counts as one terminator.
pub fn split_terminators(step: &str) -> (&str, usize) {
    let body = step.trim_end_matches(['\r', '\n']);
    let run = &step[body.len()..];
    let mut count = 0;
    let mut chars = run.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
        }
        count += 1;
    }
    (body, count)
}

//! Keystroke replay.
//!
//! A [`ReplayState`] holds a loaded recording split into steps and a cursor
//! that only moves forward, one step per successful send. The target session
//! is bound lazily on the first send and stays bound for the life of the
//! replay.

use crate::host::{CreateRequest, SessionId};
use deckhand_core::{group_flow, split_steps, split_terminators, FlowGroup, Recording};
use std::time::Duration;
use tracing::debug;

/// Delays used when delivering a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayTiming {
    /// Pause between a step's body and its first carriage return.
    pub submit_delay: Duration,
    /// Pause between repeated carriage returns.
    pub repeat_delay: Duration,
}

impl Default for ReplayTiming {
    fn default() -> Self {
        Self {
            submit_delay: Duration::from_millis(60),
            repeat_delay: Duration::from_millis(40),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayState {
    recording: Recording,
    steps: Vec<String>,
    index: usize,
    /// Writes of the current step that already went through.
    delivered: usize,
    target: Option<SessionId>,
}

impl ReplayState {
    pub fn open(recording: Recording) -> Self {
        let steps = split_steps(&recording.events);
        debug!(
            recording_id = %recording.recording_id,
            steps = steps.len(),
            "replay opened"
        );
        Self {
            recording,
            steps,
            index: 0,
            delivered: 0,
            target: None,
        }
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Index of the next step to send.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn current_step(&self) -> Option<&str> {
        self.steps.get(self.index).map(String::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.steps.len()
    }

    pub fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.index)
    }

    /// Display grouping of the raw events.
    pub fn groups(&self) -> Vec<FlowGroup> {
        group_flow(&self.recording.events)
    }

    /// Session parameters for a fresh replay target, seeded from the
    /// recording's metadata.
    pub fn seed_request(&self) -> CreateRequest {
        let meta = self.recording.meta.as_ref();
        let name = meta
            .and_then(|m| m.name.clone())
            .map(|n| format!("replay: {n}"))
            .unwrap_or_else(|| "replay".to_string());
        CreateRequest {
            name: Some(name),
            command: meta
                .and_then(|m| m.bootstrap_command.clone())
                .filter(|c| !c.trim().is_empty()),
            cwd: meta.and_then(|m| m.cwd.clone()),
            ..CreateRequest::default()
        }
    }

    /// Effect recorded with the session, if any.
    pub fn seed_effect(&self) -> Option<&str> {
        self.recording
            .meta
            .as_ref()
            .and_then(|m| m.effect_id.as_deref())
    }

    /// Bind the target session. Binding is sticky: a bound target is kept.
    pub fn bind(&mut self, session_id: &str) -> &str {
        self.target.get_or_insert_with(|| session_id.to_string())
    }

    /// Number of writes from [`plan_delivery`] for the current step that
    /// have been delivered.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn mark_delivered(&mut self) {
        self.delivered += 1;
    }

    /// Move past the current step. Call only after it was delivered.
    pub fn advance(&mut self) {
        if !self.is_finished() {
            self.index += 1;
        }
        self.delivered = 0;
    }
}

/// The writes that deliver one step, each with the pause to take before
/// it: the body first, then one carriage return per trailing terminator,
/// spaced apart so interactive programs see a submit rather than a paste.
pub fn plan_delivery(step: &str, timing: &ReplayTiming) -> Vec<(Duration, String)> {
    let (body, terminators) = split_terminators(step);
    let mut writes = Vec::with_capacity(terminators + 1);
    if !body.is_empty() {
        writes.push((Duration::ZERO, body.to_string()));
    }
    for n in 0..terminators {
        let pause = if n == 0 {
            timing.submit_delay
        } else {
            timing.repeat_delay
        };
        writes.push((pause, "\r".to_string()));
    }
    writes
}

//! Keystroke recording.
//!
//! Records timestamped user input per session while a recording is active.
//! Events are appended in arrival order with a `t` relative to the start of
//! the recording; stopping hands back the finished, immutable log. Durable
//! storage is left to a [`RecordingStore`](crate::store::RecordingStore).

use crate::host::SessionId;
use deckhand_core::{DeckError, DeckResult, InputSource, Recording, RecordingEvent, RecordingMeta};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, info};

struct ActiveRecording {
    recording_id: String,
    meta: RecordingMeta,
    started_at: Instant,
    events: Vec<RecordingEvent>,
}

#[derive(Default)]
pub struct RecordingEngine {
    active: HashMap<SessionId, ActiveRecording>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin recording a session.
    pub fn start(
        &mut self,
        session_id: &str,
        recording_id: &str,
        meta: RecordingMeta,
    ) -> DeckResult<()> {
        if self.active.contains_key(session_id) {
            return Err(DeckError::AlreadyRecording(session_id.to_string()));
        }
        self.active.insert(
            session_id.to_string(),
            ActiveRecording {
                recording_id: recording_id.to_string(),
                meta,
                started_at: Instant::now(),
                events: Vec::new(),
            },
        );
        info!(session_id, recording_id, "recording started");
        Ok(())
    }

    /// Append input written to a session. Ignored unless the session is
    /// recording and the input came from the user. Returns whether the
    /// event was recorded.
    pub fn append(&mut self, session_id: &str, data: &str, source: InputSource) -> bool {
        if source != InputSource::User || data.is_empty() {
            return false;
        }
        let Some(rec) = self.active.get_mut(session_id) else {
            return false;
        };
        let t = rec.started_at.elapsed().as_millis() as u64;
        rec.events.push(RecordingEvent {
            t,
            data: data.to_string(),
        });
        debug!(session_id, t, len = data.len(), "input recorded");
        true
    }

    /// Finish a session's recording and return it.
    pub fn stop(&mut self, session_id: &str) -> DeckResult<Recording> {
        let rec = self
            .active
            .remove(session_id)
            .ok_or_else(|| DeckError::NotRecording(session_id.to_string()))?;
        info!(
            session_id,
            recording_id = %rec.recording_id,
            events = rec.events.len(),
            "recording stopped"
        );
        Ok(Recording {
            recording_id: rec.recording_id,
            meta: Some(rec.meta),
            events: rec.events,
        })
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    pub fn recording_id(&self, session_id: &str) -> Option<&str> {
        self.active
            .get(session_id)
            .map(|r| r.recording_id.as_str())
    }
}

//! deckhand-core: shared library for the deckhand session bridge.
//!
//! Provides the escape-sequence lexer and sanitizer, the effect catalog
//! used to recognise agent launches, the recording wire format, and the
//! pure step/flow logic behind keystroke replay.

pub mod effect;
pub mod error;
pub mod escape;
pub mod recording;
pub mod steps;

// Re-export commonly used items at crate root.
pub use effect::{Effect, EffectCatalog, DEFAULT_IDLE_AFTER_MS};
pub use error::{DeckError, DeckResult};
pub use escape::{sanitize, EscapeScanner, ShellMark, Token};
pub use recording::{
    sanitize_recording_id, InputSource, Recording, RecordingEvent, RecordingMeta,
    RecordingSummary, SCHEMA_VERSION,
};
pub use steps::{group_flow, split_steps, split_terminators, FlowGroup};

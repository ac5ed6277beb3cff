//! deckhand-bridge: the session/recording bridge.
//!
//! Routes process-host output to terminal surfaces (buffering while none is
//! attached), tracks whether a session's agent is working, records and
//! replays user keystrokes, and relays input into multiplexer-backed
//! persistent sessions. [`Bridge`] ties these together behind a single
//! owner; [`PtyHost`] is the pseudo-terminal process host it normally
//! drives.

pub mod bridge;
pub mod config;
pub mod host;
pub mod idle;
pub mod persistent;
pub mod pty;
pub mod recorder;
pub mod relay;
pub mod replay;
mod shell_hooks;
pub mod store;

pub use bridge::{
    Bridge, BridgeEvent, BridgeInbox, BridgeSettings, Inbound, SessionState, StartRecording,
};
pub use config::{BridgeConfig, ConfigOverrides};
pub use host::{CreateRequest, HostEvent, ProcessHost, SessionId, SessionInfo};
pub use persistent::{PersistentRelay, ScrollGesture};
pub use pty::{MultiplexerConfig, PtyHost};
pub use relay::{OutputRelay, Surface};
pub use replay::{ReplayState, ReplayTiming};
pub use store::{FileRecordingStore, MemoryRecordingStore, RecordingStore};

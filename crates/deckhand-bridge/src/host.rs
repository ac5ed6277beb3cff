//! Process-host contract.
//!
//! The process host owns the pseudo-terminals. The bridge drives it through
//! [`ProcessHost`] and receives its output/exit notifications as
//! [`HostEvent`]s on a channel supplied when the host is built.

use deckhand_core::{DeckResult, InputSource};
use std::collections::HashMap;

/// Opaque handle to a live process-host connection.
pub type SessionId = String;

/// Push notification from the process host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Decoded terminal output.
    Output { session_id: SessionId, data: String },
    /// The process exited; no more output follows for this session.
    Exit {
        session_id: SessionId,
        exit_code: Option<u32>,
    },
}

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: Option<String>,
    pub command: Option<String>,
    pub cwd: Option<String>,
    pub env_vars: HashMap<String, String>,
    /// Back the session with a terminal multiplexer.
    pub persistent: bool,
    pub persist_id: Option<String>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for CreateRequest {
    fn default() -> Self {
        Self {
            name: None,
            command: None,
            cwd: None,
            env_vars: HashMap::new(),
            persistent: false,
            persist_id: None,
            cols: 80,
            rows: 24,
        }
    }
}

/// What the host reports back for a newly opened session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    /// Unique display name.
    pub name: String,
    /// The command line actually launched, for display.
    pub command: String,
    pub cwd: Option<String>,
}

/// Operations issued to the process host.
#[allow(async_fn_in_trait)]
pub trait ProcessHost {
    /// Spawn a new session.
    async fn create(&self, request: CreateRequest) -> DeckResult<SessionInfo>;

    /// Write input to a session.
    async fn write(&self, session_id: &str, data: &str, source: InputSource) -> DeckResult<()>;

    /// Resize a session's terminal.
    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> DeckResult<()>;

    /// Terminate a session. Persistent sessions lose their multiplexer session too.
    async fn close(&self, session_id: &str) -> DeckResult<()>;

    /// Drop the client side of a persistent session, leaving the
    /// multiplexer session running for a later reattach.
    async fn detach(&self, session_id: &str) -> DeckResult<()>;

    /// Persist ids of multiplexer sessions owned by this host.
    async fn list_persistent(&self) -> DeckResult<Vec<String>>;

    /// Kill a multiplexer session by persist id.
    async fn kill_persistent(&self, persist_id: &str) -> DeckResult<()>;
}

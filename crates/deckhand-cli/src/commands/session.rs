//! Interactive session loop shared by `run` and `replay`.
//!
//! Owns a bridge over the PTY host and pumps three sources on one task:
//! bridge inbound events (host output/exit, idle timers), bridge
//! notifications for display, and keystrokes from the local terminal.

use anyhow::{Context, Result};
use deckhand_bridge::{
    Bridge, BridgeConfig, BridgeEvent, BridgeInbox, FileRecordingStore, PtyHost, ReplayState,
};
use deckhand_core::InputSource;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::surface::StdoutSurface;
use crate::terminal::{self as term, TermInput};

/// Ctrl+N: send the next replay step.
const NEXT_STEP: &str = "\x0e";

pub type CliBridge = Bridge<PtyHost, FileRecordingStore>;

/// A bridge plus the channels that drive it.
pub struct Deck {
    pub bridge: CliBridge,
    inbox: BridgeInbox,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl Deck {
    pub fn new(config: &BridgeConfig) -> Self {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let host = PtyHost::new(host_tx, config.multiplexer());
        let store = FileRecordingStore::new(&config.recordings_dir);
        let (bridge, inbox, events) = Bridge::new(host, store, config.settings(), host_rx);
        Self {
            bridge,
            inbox,
            events,
        }
    }
}

/// Replay driven from the interactive loop.
pub struct ReplayControl<'a> {
    pub state: &'a mut ReplayState,
    /// Send steps on a timer instead of on Ctrl+N.
    pub auto: Option<Duration>,
}

/// Why the interactive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Exited(Option<u32>),
    Detached,
}

/// Attach the local terminal to a session until it exits or the user
/// presses Ctrl+].
pub async fn interact(
    deck: &mut Deck,
    session_id: &str,
    mut replay: Option<ReplayControl<'_>>,
) -> Result<Ending> {
    let (cols, rows) = term::get_terminal_size();
    let _guard = term::RawModeGuard::enter().context("failed to enter raw terminal mode")?;

    deck.bridge.set_foreground(Some(session_id));
    deck.bridge.attach(session_id, Box::new(StdoutSurface));
    let _ = deck.bridge.resize(session_id, cols, rows).await;

    let (tx_input, mut rx_input) = mpsc::channel::<TermInput>(64);
    let reader = term::spawn_reader(tx_input);

    let auto = replay.as_ref().and_then(|r| r.auto);
    let mut ticker = tokio::time::interval(auto.unwrap_or(Duration::from_secs(3600)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let ending = loop {
        let auto_pending = auto.is_some()
            && replay
                .as_ref()
                .map(|r| !r.state.is_finished())
                .unwrap_or(false);
        tokio::select! {
            Some(inbound) = deck.inbox.recv() => deck.bridge.dispatch(inbound).await,
            Some(event) = deck.events.recv() => match event {
                BridgeEvent::Exited { session_id: id, exit_code } if id == session_id => {
                    break Ending::Exited(exit_code);
                }
                BridgeEvent::Error { message, .. } => notice(&message),
                other => debug!(event = ?other, "bridge event"),
            },
            Some(input) = rx_input.recv() => match input {
                TermInput::Data(data) => {
                    if let Some(control) = replay.as_mut().filter(|_| data == NEXT_STEP) {
                        send_step(deck, control.state).await;
                    } else {
                        let _ = deck.bridge.send_input(session_id, &data, InputSource::User).await;
                    }
                }
                TermInput::Resize(cols, rows) => {
                    let _ = deck.bridge.resize(session_id, cols, rows).await;
                }
                TermInput::Detach => break Ending::Detached,
            },
            _ = ticker.tick(), if auto_pending => {
                if let Some(control) = replay.as_mut() {
                    send_step(deck, control.state).await;
                }
            }
        }
    };

    reader.abort();
    deck.bridge.detach(session_id);
    deck.bridge.set_foreground(None);
    info!(session_id, ending = ?ending, "left session");
    Ok(ending)
}

async fn send_step(deck: &mut Deck, state: &mut ReplayState) {
    if state.is_finished() {
        notice("replay finished");
        return;
    }
    // Failures are reported through the bridge event stream.
    if let Ok(index) = deck.bridge.replay_next(state).await {
        if state.is_finished() {
            notice(&format!("replay: sent step {index}, finished"));
        } else {
            debug!(index, remaining = state.remaining(), "replay step sent");
        }
    }
}

/// Print a status line without disturbing raw-mode output.
fn notice(message: &str) {
    eprint!("\r\n[deckhand] {message}\r\n");
}

/// Tear down after the loop: stop any recording, then detach a persistent
/// session or close the session. Returns the id of the recording made
/// during the session, if any.
pub async fn finish(deck: &mut Deck, session_id: &str, ending: Ending) -> Result<Option<String>> {
    let Some(session) = deck.bridge.session(session_id) else {
        return Ok(None);
    };
    let persistent = session.persistent;
    let recording = if session.recording_active {
        Some(
            deck.bridge
                .stop_recording(session_id)
                .await
                .context("failed to save recording")?,
        )
    } else {
        session.last_recording_id.clone()
    };

    if persistent && ending == Ending::Detached {
        deck.bridge
            .detach_persistent(session_id)
            .await
            .context("failed to detach from persistent session")?;
    } else {
        deck.bridge
            .close_session(session_id)
            .await
            .context("failed to close session")?;
    }
    Ok(recording)
}

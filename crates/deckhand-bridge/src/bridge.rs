//! Session/recording bridge.
//!
//! [`Bridge`] is the single owner of every piece of per-session state: the
//! session registry, output routes, idle timers, active recordings and the
//! persistent-session relays. It is driven by one task through `&mut self`;
//! process-host notifications and idle-timer firings reach it through a
//! [`BridgeInbox`] and are applied with [`Bridge::dispatch`], so events for
//! one session are always handled in the order they were produced.

use crate::host::{CreateRequest, HostEvent, ProcessHost, SessionId};
use crate::idle::{IdleFired, IdleScheduler};
use crate::persistent::{PersistentRelay, ScrollConfig, ScrollGesture};
use crate::recorder::RecordingEngine;
use crate::relay::{OutputRelay, Surface};
use crate::replay::{plan_delivery, ReplayState, ReplayTiming};
use crate::store::RecordingStore;
use deckhand_core::{
    sanitize_recording_id, DeckError, DeckResult, EffectCatalog, EscapeScanner, InputSource,
    RecordingMeta, ShellMark, DEFAULT_IDLE_AFTER_MS, SCHEMA_VERSION,
};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Live state of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub id: SessionId,
    /// Stable identity that survives detach/reattach.
    pub persist_id: String,
    pub name: String,
    /// Command the session was launched with, if any.
    pub command: Option<String>,
    pub cwd: Option<String>,
    pub persistent: bool,
    pub effect_id: Option<String>,
    pub agent_working: bool,
    pub recording_active: bool,
    pub last_recording_id: Option<String>,
    pub exited: bool,
    pub closing: bool,
    pub exit_code: Option<u32>,
    pub cols: u16,
    pub rows: u16,
}

/// Notification for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    SessionOpened {
        session_id: SessionId,
        name: String,
    },
    WorkingChanged {
        session_id: SessionId,
        working: bool,
    },
    EffectChanged {
        session_id: SessionId,
        effect_id: Option<String>,
    },
    RecordingStarted {
        session_id: SessionId,
        recording_id: String,
    },
    RecordingStopped {
        session_id: SessionId,
        recording_id: String,
    },
    Exited {
        session_id: SessionId,
        exit_code: Option<u32>,
    },
    Closed {
        session_id: SessionId,
    },
    /// A failed operation. Nothing is torn down; the message is for display.
    Error {
        session_id: Option<SessionId>,
        message: String,
    },
}

/// Something the bridge must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Host(HostEvent),
    Idle(IdleFired),
}

/// Receiving side of everything that feeds the bridge.
pub struct BridgeInbox {
    host_rx: mpsc::UnboundedReceiver<HostEvent>,
    idle_rx: mpsc::UnboundedReceiver<IdleFired>,
}

impl BridgeInbox {
    /// Next inbound event. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        tokio::select! {
            Some(event) = self.host_rx.recv() => Some(Inbound::Host(event)),
            Some(fired) = self.idle_rx.recv() => Some(Inbound::Idle(fired)),
            else => None,
        }
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<Inbound> {
        if let Ok(event) = self.host_rx.try_recv() {
            return Some(Inbound::Host(event));
        }
        self.idle_rx.try_recv().ok().map(Inbound::Idle)
    }
}

/// Tunables for a bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub max_sessions: usize,
    pub max_chunks: usize,
    pub timing: ReplayTiming,
    pub scroll: ScrollConfig,
    pub catalog: EffectCatalog,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            max_chunks: 2000,
            timing: ReplayTiming::default(),
            scroll: ScrollConfig::default(),
            catalog: EffectCatalog::builtin(),
        }
    }
}

/// Options for starting a recording.
#[derive(Debug, Clone, Default)]
pub struct StartRecording {
    /// Explicit id; generated when absent.
    pub recording_id: Option<String>,
    pub name: Option<String>,
    pub project_id: String,
}

pub struct Bridge<H: ProcessHost, S: RecordingStore> {
    host: H,
    store: S,
    sessions: HashMap<SessionId, SessionState>,
    relay: OutputRelay,
    idle: IdleScheduler,
    recorder: RecordingEngine,
    persistent: HashMap<SessionId, PersistentRelay>,
    marks: HashMap<SessionId, EscapeScanner>,
    foreground: Option<SessionId>,
    catalog: EffectCatalog,
    timing: ReplayTiming,
    scroll: ScrollConfig,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl<H: ProcessHost, S: RecordingStore> Bridge<H, S> {
    /// Build a bridge around a process host whose notifications arrive on
    /// `host_rx`. Returns the inbox to drain and the UI event stream.
    pub fn new(
        host: H,
        store: S,
        settings: BridgeSettings,
        host_rx: mpsc::UnboundedReceiver<HostEvent>,
    ) -> (Self, BridgeInbox, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let bridge = Self {
            host,
            store,
            sessions: HashMap::new(),
            relay: OutputRelay::new(settings.max_sessions, settings.max_chunks),
            idle: IdleScheduler::new(idle_tx),
            recorder: RecordingEngine::new(),
            persistent: HashMap::new(),
            marks: HashMap::new(),
            foreground: None,
            catalog: settings.catalog,
            timing: settings.timing,
            scroll: settings.scroll,
            events: events_tx,
        };
        (bridge, BridgeInbox { host_rx, idle_rx }, events_rx)
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Open a session through the process host and register it.
    pub async fn open_session(&mut self, mut request: CreateRequest) -> DeckResult<SessionId> {
        let persist_id = request
            .persist_id
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(new_persist_id);
        request.persist_id = Some(persist_id.clone());

        let info = match self.host.create(request.clone()).await {
            Ok(info) => info,
            Err(e) => {
                self.report(None, &e);
                return Err(e);
            }
        };

        let effect_id = self
            .catalog
            .classify(request.command.as_deref(), request.name.as_deref())
            .map(|e| e.id.clone());
        let state = SessionState {
            id: info.id.clone(),
            persist_id,
            name: info.name.clone(),
            command: request.command.clone().filter(|c| !c.trim().is_empty()),
            cwd: info.cwd.clone().or(request.cwd.clone()),
            persistent: request.persistent,
            effect_id: effect_id.clone(),
            agent_working: false,
            recording_active: false,
            last_recording_id: None,
            exited: false,
            closing: false,
            exit_code: None,
            cols: request.cols,
            rows: request.rows,
        };
        info!(
            session_id = %info.id,
            name = %info.name,
            persistent = request.persistent,
            effect = ?effect_id,
            "session opened"
        );
        if request.persistent {
            self.persistent
                .insert(info.id.clone(), PersistentRelay::new(self.scroll));
        }
        self.sessions.insert(info.id.clone(), state);
        self.emit(BridgeEvent::SessionOpened {
            session_id: info.id.clone(),
            name: info.name,
        });
        if effect_id.is_some() {
            self.emit(BridgeEvent::EffectChanged {
                session_id: info.id.clone(),
                effect_id,
            });
        }
        Ok(info.id)
    }

    /// Apply one inbound event.
    pub async fn dispatch(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Host(HostEvent::Output { session_id, data }) => {
                self.on_output(&session_id, data)
            }
            Inbound::Host(HostEvent::Exit {
                session_id,
                exit_code,
            }) => self.on_exit(&session_id, exit_code).await,
            Inbound::Idle(fired) => self.on_idle(&fired),
        }
    }

    fn on_output(&mut self, session_id: &str, data: String) {
        match self.sessions.get(session_id) {
            Some(s) if !s.closing => {}
            Some(_) => return,
            None => {
                debug!(session_id, "output for unknown session dropped");
                return;
            }
        }

        let marks = self
            .marks
            .entry(session_id.to_string())
            .or_default()
            .feed_marks(&data);
        for mark in marks {
            match mark {
                ShellMark::Command(command) => {
                    let effect_id = if command.is_empty() {
                        None
                    } else {
                        self.catalog
                            .classify(Some(&command), None)
                            .map(|e| e.id.clone())
                    };
                    self.set_effect(session_id, effect_id);
                }
                ShellMark::CurrentDir(dir) => {
                    if let Some(s) = self.sessions.get_mut(session_id) {
                        s.cwd = Some(dir);
                    }
                }
            }
        }

        self.note_activity(session_id);
        self.relay.on_output(session_id, data);
    }

    /// Output arrived: a session running an agent is working until it has
    /// been quiet for the agent's idle period.
    fn note_activity(&mut self, session_id: &str) {
        let Some(s) = self.sessions.get(session_id) else {
            return;
        };
        let Some(effect_id) = s.effect_id.as_deref() else {
            return;
        };
        if s.exited || s.closing {
            return;
        }
        let background = s.persistent && self.foreground.as_deref() != Some(session_id);
        if background && !s.agent_working {
            return;
        }
        let after = self
            .catalog
            .get(effect_id)
            .map(|e| e.idle_after())
            .unwrap_or(Duration::from_millis(DEFAULT_IDLE_AFTER_MS));
        self.set_working(session_id, true);
        self.idle.schedule(session_id, after);
    }

    fn on_idle(&mut self, fired: &IdleFired) {
        if self.idle.accept(fired) {
            debug!(session_id = %fired.session_id, "session went idle");
            self.set_working(&fired.session_id, false);
        }
    }

    async fn on_exit(&mut self, session_id: &str, exit_code: Option<u32>) {
        let Some(s) = self.sessions.get_mut(session_id) else {
            return;
        };
        s.exited = true;
        s.exit_code = exit_code;
        info!(session_id, exit_code = ?exit_code, "session exited");
        self.force_idle(session_id);
        self.finish_recording(session_id).await;
        self.emit(BridgeEvent::Exited {
            session_id: session_id.to_string(),
            exit_code,
        });
    }

    /// Write input to a session. Persistent sessions go through their relay
    /// first; user keystrokes are recorded when a recording is active.
    pub async fn send_input(
        &mut self,
        session_id: &str,
        data: &str,
        source: InputSource,
    ) -> DeckResult<()> {
        let Some(session) = self.sessions.get(session_id) else {
            let e = DeckError::SessionNotFound(session_id.to_string());
            self.report(Some(session_id), &e);
            return Err(e);
        };
        let rows = session.rows;

        let outgoing = match self.persistent.get_mut(session_id) {
            Some(relay) => {
                if source == InputSource::User {
                    if let Some(gesture) = ScrollGesture::from_input(data) {
                        return match relay.scroll(gesture, rows) {
                            Some(bytes) => {
                                self.write_host(session_id, &bytes, InputSource::System)
                                    .await
                            }
                            None => Ok(()),
                        };
                    }
                }
                let relayed = relay.input(data);
                for line in &relayed.submitted {
                    let matched = self
                        .catalog
                        .classify(Some(line), None)
                        .map(|e| e.id.clone());
                    debug!(session_id, line = %line, effect = ?matched, "command submitted");
                    if matched.is_some() {
                        self.set_effect(session_id, matched);
                    }
                }
                relayed.bytes
            }
            None => data.to_string(),
        };

        self.write_host(session_id, &outgoing, source).await?;
        self.recorder.append(session_id, data, source);
        Ok(())
    }

    /// Scroll a persistent session's multiplexer view.
    pub async fn scroll(&mut self, session_id: &str, gesture: ScrollGesture) -> DeckResult<()> {
        let rows = self.session(session_id).map(|s| s.rows).unwrap_or(24);
        let Some(relay) = self.persistent.get_mut(session_id) else {
            let e = if self.sessions.contains_key(session_id) {
                DeckError::NotPersistent(session_id.to_string())
            } else {
                DeckError::SessionNotFound(session_id.to_string())
            };
            self.report(Some(session_id), &e);
            return Err(e);
        };
        match relay.scroll(gesture, rows) {
            Some(bytes) => {
                self.write_host(session_id, &bytes, InputSource::System)
                    .await
            }
            None => Ok(()),
        }
    }

    pub async fn resize(&mut self, session_id: &str, cols: u16, rows: u16) -> DeckResult<()> {
        if let Err(e) = self.host.resize(session_id, cols, rows).await {
            self.report(Some(session_id), &e);
            return Err(e);
        }
        if let Some(s) = self.sessions.get_mut(session_id) {
            s.cols = cols;
            s.rows = rows;
        }
        Ok(())
    }

    /// Bind a terminal surface; anything buffered is written to it first.
    pub fn attach(&mut self, session_id: &str, surface: Box<dyn Surface>) {
        self.relay.on_attach(session_id, surface);
    }

    /// An attached surface finished initializing.
    pub fn surface_ready(&mut self, session_id: &str) {
        self.relay.on_ready(session_id);
    }

    /// Unbind the surface. Later output is buffered; the session is idle
    /// until it produces output again.
    pub fn detach(&mut self, session_id: &str) -> Option<Box<dyn Surface>> {
        if let Some(relay) = self.persistent.get_mut(session_id) {
            relay.reset();
        }
        self.force_idle(session_id);
        self.relay.on_detach(session_id)
    }

    /// Leave a persistent session running in the multiplexer and forget
    /// the local client.
    pub async fn detach_persistent(&mut self, session_id: &str) -> DeckResult<()> {
        match self.sessions.get(session_id) {
            Some(s) if s.persistent => {}
            Some(_) => {
                let e = DeckError::NotPersistent(session_id.to_string());
                self.report(Some(session_id), &e);
                return Err(e);
            }
            None => {
                let e = DeckError::SessionNotFound(session_id.to_string());
                self.report(Some(session_id), &e);
                return Err(e);
            }
        }
        if let Err(e) = self.host.detach(session_id).await {
            self.report(Some(session_id), &e);
            return Err(e);
        }
        self.force_idle(session_id);
        self.finish_recording(session_id).await;
        self.forget(session_id);
        info!(session_id, "persistent session detached");
        self.emit(BridgeEvent::Closed {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Mark which session the user is looking at.
    pub fn set_foreground(&mut self, session_id: Option<&str>) {
        self.foreground = session_id.map(str::to_string);
    }

    pub fn foreground(&self) -> Option<&str> {
        self.foreground.as_deref()
    }

    /// The session's running command changed. A command that is not a
    /// known agent clears the effect.
    pub fn set_command(&mut self, session_id: &str, command: Option<&str>) {
        let effect_id = command
            .and_then(|c| self.catalog.classify(Some(c), None))
            .map(|e| e.id.clone());
        self.set_effect(session_id, effect_id);
    }

    /// Close a session. Its idle timer and buffered output are dropped
    /// before the host is asked to close it; on failure the session stays.
    pub async fn close_session(&mut self, session_id: &str) -> DeckResult<()> {
        let Some(s) = self.sessions.get_mut(session_id) else {
            let e = DeckError::SessionNotFound(session_id.to_string());
            self.report(Some(session_id), &e);
            return Err(e);
        };
        s.closing = true;
        self.force_idle(session_id);
        self.relay.discard(session_id);
        self.finish_recording(session_id).await;

        if let Err(e) = self.host.close(session_id).await {
            if let Some(s) = self.sessions.get_mut(session_id) {
                s.closing = false;
            }
            self.report(Some(session_id), &e);
            return Err(e);
        }
        self.forget(session_id);
        info!(session_id, "session closed");
        self.emit(BridgeEvent::Closed {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    // ── Recording ───────────────────────────────────────────────────

    /// Start recording a session's keystrokes. Returns the recording id.
    pub async fn start_recording(
        &mut self,
        session_id: &str,
        options: StartRecording,
    ) -> DeckResult<String> {
        let Some(s) = self.sessions.get(session_id) else {
            let e = DeckError::SessionNotFound(session_id.to_string());
            self.report(Some(session_id), &e);
            return Err(e);
        };
        let created_at = epoch_millis();
        let recording_id = sanitize_recording_id(
            &options
                .recording_id
                .unwrap_or_else(|| format!("{created_at}-{}", hex::encode(rand::random::<[u8; 3]>()))),
        );
        let meta = RecordingMeta {
            schema_version: SCHEMA_VERSION,
            created_at,
            name: options.name,
            project_id: options.project_id,
            session_persist_id: s.persist_id.clone(),
            cwd: s.cwd.clone(),
            effect_id: s.effect_id.clone(),
            bootstrap_command: s.command.clone(),
        };
        if let Err(e) = self.recorder.start(session_id, &recording_id, meta) {
            self.report(Some(session_id), &e);
            return Err(e);
        }
        if let Some(s) = self.sessions.get_mut(session_id) {
            s.recording_active = true;
        }
        self.emit(BridgeEvent::RecordingStarted {
            session_id: session_id.to_string(),
            recording_id: recording_id.clone(),
        });
        Ok(recording_id)
    }

    /// Stop recording and persist the log. Returns the recording id.
    pub async fn stop_recording(&mut self, session_id: &str) -> DeckResult<String> {
        let recording = match self.recorder.stop(session_id) {
            Ok(r) => r,
            Err(e) => {
                self.report(Some(session_id), &e);
                return Err(e);
            }
        };
        if let Some(s) = self.sessions.get_mut(session_id) {
            s.recording_active = false;
        }

        let saved = match recording.meta.as_ref() {
            Some(meta) => {
                self.store
                    .save(&recording.recording_id, meta, &recording.events)
                    .await
            }
            None => Err(DeckError::Store("recording has no metadata".into())),
        };
        if let Err(e) = saved {
            self.report(Some(session_id), &e);
            return Err(e);
        }

        if let Some(s) = self.sessions.get_mut(session_id) {
            s.last_recording_id = Some(recording.recording_id.clone());
        }
        self.emit(BridgeEvent::RecordingStopped {
            session_id: session_id.to_string(),
            recording_id: recording.recording_id.clone(),
        });
        Ok(recording.recording_id)
    }

    async fn finish_recording(&mut self, session_id: &str) {
        if self.recorder.is_active(session_id) {
            // Failures are already reported.
            let _ = self.stop_recording(session_id).await;
        }
    }

    // ── Replay ──────────────────────────────────────────────────────

    /// Load a recording for step-by-step replay.
    pub async fn open_replay(&mut self, recording_id: &str) -> DeckResult<ReplayState> {
        match self.store.load(recording_id).await {
            Ok(recording) => Ok(ReplayState::open(recording)),
            Err(e) => {
                self.report(None, &e);
                Err(e)
            }
        }
    }

    /// The replay's target session, opening one seeded from the recording
    /// if none is bound yet.
    pub async fn ensure_replay_target(&mut self, state: &mut ReplayState) -> DeckResult<SessionId> {
        if let Some(target) = state.target() {
            return Ok(target.to_string());
        }
        let session_id = self.open_session(state.seed_request()).await?;
        if let Some(effect_id) = state.seed_effect() {
            if self.catalog.get(effect_id).is_some() {
                self.set_effect(&session_id, Some(effect_id.to_string()));
            }
        }
        Ok(state.bind(&session_id).to_string())
    }

    /// Send the current step. The replay advances by exactly one step, and
    /// only if every write succeeded. Returns the new index.
    pub async fn replay_next(&mut self, state: &mut ReplayState) -> DeckResult<usize> {
        let Some(step) = state.current_step().map(str::to_string) else {
            let e = DeckError::Replay("no steps remaining".into());
            self.report(state.target(), &e);
            return Err(e);
        };
        let target = self.ensure_replay_target(state).await?;
        // A retry resumes after the writes that already went through.
        for (pause, data) in plan_delivery(&step, &self.timing)
            .into_iter()
            .skip(state.delivered())
        {
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            self.send_input(&target, &data, InputSource::System).await?;
            state.mark_delivered();
        }
        state.advance();
        info!(
            session_id = %target,
            recording_id = %state.recording().recording_id,
            step = state.index(),
            remaining = state.remaining(),
            "replay step sent"
        );
        Ok(state.index())
    }

    // ── Persistent sessions ─────────────────────────────────────────

    pub async fn list_persistent(&mut self) -> DeckResult<Vec<String>> {
        match self.host.list_persistent().await {
            Ok(list) => Ok(list),
            Err(e) => {
                self.report(None, &e);
                Err(e)
            }
        }
    }

    pub async fn kill_persistent(&mut self, persist_id: &str) -> DeckResult<()> {
        if let Err(e) = self.host.kill_persistent(persist_id).await {
            self.report(None, &e);
            return Err(e);
        }
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn session(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionState> {
        self.sessions.values()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn relay(&self) -> &OutputRelay {
        &self.relay
    }

    pub fn idle_pending(&self, session_id: &str) -> bool {
        self.idle.is_pending(session_id)
    }

    pub fn catalog(&self) -> &EffectCatalog {
        &self.catalog
    }

    // ── Internals ───────────────────────────────────────────────────

    fn set_effect(&mut self, session_id: &str, effect_id: Option<String>) {
        let Some(s) = self.sessions.get_mut(session_id) else {
            return;
        };
        if s.effect_id == effect_id {
            return;
        }
        s.effect_id = effect_id.clone();
        debug!(session_id, effect = ?effect_id, "effect changed");
        if effect_id.is_none() {
            self.force_idle(session_id);
        }
        self.emit(BridgeEvent::EffectChanged {
            session_id: session_id.to_string(),
            effect_id,
        });
    }

    fn set_working(&mut self, session_id: &str, working: bool) {
        let Some(s) = self.sessions.get_mut(session_id) else {
            return;
        };
        if s.agent_working == working {
            return;
        }
        s.agent_working = working;
        self.emit(BridgeEvent::WorkingChanged {
            session_id: session_id.to_string(),
            working,
        });
    }

    fn force_idle(&mut self, session_id: &str) {
        self.idle.cancel(session_id);
        self.set_working(session_id, false);
    }

    fn forget(&mut self, session_id: &str) {
        self.idle.cancel(session_id);
        self.relay.discard(session_id);
        self.sessions.remove(session_id);
        self.persistent.remove(session_id);
        self.marks.remove(session_id);
        if self.foreground.as_deref() == Some(session_id) {
            self.foreground = None;
        }
    }

    async fn write_host(
        &mut self,
        session_id: &str,
        data: &str,
        source: InputSource,
    ) -> DeckResult<()> {
        if let Err(e) = self.host.write(session_id, data, source).await {
            self.report(Some(session_id), &e);
            return Err(e);
        }
        Ok(())
    }

    fn report(&self, session_id: Option<&str>, error: &DeckError) {
        warn!(session_id = ?session_id, error = %error, "bridge operation failed");
        self.emit(BridgeEvent::Error {
            session_id: session_id.map(str::to_string),
            message: error.to_string(),
        });
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }
}

fn new_persist_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SessionInfo;
    use crate::store::MemoryRecordingStore;
    use deckhand_core::RecordingEvent;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Process host double that records what it was asked to do.
    #[derive(Clone, Default)]
    struct RecordingHost {
        next_id: Arc<AtomicU64>,
        creates: Arc<Mutex<Vec<CreateRequest>>>,
        writes: Arc<Mutex<Vec<(String, String, InputSource)>>>,
        closes: Arc<Mutex<Vec<String>>>,
        fail_writes: Arc<AtomicBool>,
        /// Fail only writes of exactly this data.
        fail_data: Arc<Mutex<Option<String>>>,
        fail_close: Arc<AtomicBool>,
    }

    impl RecordingHost {
        fn writes(&self) -> Vec<String> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|(_, data, _)| data.clone())
                .collect()
        }
    }

    impl ProcessHost for RecordingHost {
        async fn create(&self, request: CreateRequest) -> DeckResult<SessionInfo> {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let info = SessionInfo {
                id: format!("s{n}"),
                name: request.name.clone().unwrap_or_else(|| "shell".into()),
                command: request.command.clone().unwrap_or_default(),
                cwd: request.cwd.clone(),
            };
            self.creates.lock().unwrap().push(request);
            Ok(info)
        }

        async fn write(&self, session_id: &str, data: &str, source: InputSource) -> DeckResult<()> {
            if self.fail_writes.load(Ordering::SeqCst)
                || self.fail_data.lock().unwrap().as_deref() == Some(data)
            {
                return Err(DeckError::Host("write failed".into()));
            }
            self.writes
                .lock()
                .unwrap()
                .push((session_id.to_string(), data.to_string(), source));
            Ok(())
        }

        async fn resize(&self, _session_id: &str, _cols: u16, _rows: u16) -> DeckResult<()> {
            Ok(())
        }

        async fn close(&self, session_id: &str) -> DeckResult<()> {
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(DeckError::Host("close failed".into()));
            }
            self.closes.lock().unwrap().push(session_id.to_string());
            Ok(())
        }

        async fn detach(&self, _session_id: &str) -> DeckResult<()> {
            Ok(())
        }

        async fn list_persistent(&self) -> DeckResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn kill_persistent(&self, _persist_id: &str) -> DeckResult<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct TestSurface {
        written: Arc<Mutex<Vec<String>>>,
    }

    impl Surface for TestSurface {
        fn write(&mut self, data: &str) {
            self.written.lock().unwrap().push(data.to_string());
        }
    }

    struct Harness {
        bridge: Bridge<RecordingHost, MemoryRecordingStore>,
        inbox: BridgeInbox,
        events: mpsc::UnboundedReceiver<BridgeEvent>,
        host_tx: mpsc::UnboundedSender<HostEvent>,
        host: RecordingHost,
    }

    impl Harness {
        fn new() -> Self {
            let host = RecordingHost::default();
            let (host_tx, host_rx) = mpsc::unbounded_channel();
            let (bridge, inbox, events) = Bridge::new(
                host.clone(),
                MemoryRecordingStore::new(),
                BridgeSettings::default(),
                host_rx,
            );
            Self {
                bridge,
                inbox,
                events,
                host_tx,
                host,
            }
        }

        async fn output(&mut self, session_id: &str, data: &str) {
            self.host_tx
                .send(HostEvent::Output {
                    session_id: session_id.into(),
                    data: data.into(),
                })
                .unwrap();
            let inbound = self.inbox.recv().await.unwrap();
            self.bridge.dispatch(inbound).await;
        }

        fn drain_events(&mut self) -> Vec<BridgeEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.events.try_recv() {
                out.push(ev);
            }
            out
        }

        fn working(&self, session_id: &str) -> bool {
            self.bridge.session(session_id).unwrap().agent_working
        }
    }

    fn command(cmd: &str) -> CreateRequest {
        CreateRequest {
            command: Some(cmd.into()),
            ..CreateRequest::default()
        }
    }

    fn persistent(cmd: Option<&str>) -> CreateRequest {
        CreateRequest {
            command: cmd.map(str::to_string),
            persistent: true,
            ..CreateRequest::default()
        }
    }

    #[tokio::test]
    async fn output_is_buffered_until_attach() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(CreateRequest::default()).await.unwrap();
        h.output(&id, "one").await;
        h.output(&id, "two").await;
        assert_eq!(h.bridge.relay().queued(&id), vec!["one", "two"]);

        let surface = TestSurface::default();
        h.bridge.attach(&id, Box::new(surface.clone()));
        h.output(&id, "three").await;
        assert_eq!(
            *surface.written.lock().unwrap(),
            vec!["one", "two", "three"]
        );
        assert!(h.bridge.relay().queued(&id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_after_quiet_period_and_output_extends_it() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(command("codex")).await.unwrap();
        assert_eq!(h.bridge.session(&id).unwrap().effect_id.as_deref(), Some("codex"));

        let start = Instant::now();
        h.output(&id, "thinking").await;
        assert!(h.working(&id));

        tokio::time::advance(Duration::from_millis(1000)).await;
        h.output(&id, "still thinking").await;
        assert!(h.working(&id));

        tokio::time::advance(Duration::from_millis(2499)).await;
        assert!(h.inbox.try_recv().is_none());
        assert!(h.working(&id));

        let fired = h.inbox.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(3500));
        h.bridge.dispatch(fired).await;
        assert!(!h.working(&id));

        let transitions: Vec<bool> = h
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                BridgeEvent::WorkingChanged { working, .. } => Some(working),
                _ => None,
            })
            .collect();
        assert_eq!(transitions, vec![true, false]);
    }

    #[tokio::test]
    async fn sessions_without_effect_never_work() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(command("htop")).await.unwrap();
        h.output(&id, "redraw").await;
        assert!(!h.working(&id));
        assert!(!h.bridge.idle_pending(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn background_persistent_output_does_not_start_work() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(persistent(Some("claude"))).await.unwrap();

        h.output(&id, "redraw noise").await;
        assert!(!h.working(&id));

        h.bridge.set_foreground(Some(&id));
        h.output(&id, "real output").await;
        assert!(h.working(&id));

        h.bridge.set_foreground(None);
        h.output(&id, "more").await;
        assert!(h.working(&id));
        assert!(h.bridge.idle_pending(&id));
    }

    #[tokio::test]
    async fn shell_marks_drive_effect_and_cwd() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(CreateRequest::default()).await.unwrap();
        h.output(&id, "\x1b]1337;Command=/usr/bin/claude --resume\x07").await;
        assert_eq!(h.bridge.session(&id).unwrap().effect_id.as_deref(), Some("claude"));
        assert!(h.working(&id));

        h.output(&id, "\x1b]1337;CurrentDir=/work\x07\x1b]1337;Com").await;
        h.output(&id, "mand=\x07$ ").await;
        let s = h.bridge.session(&id).unwrap();
        assert_eq!(s.cwd.as_deref(), Some("/work"));
        assert_eq!(s.effect_id, None);
        assert!(!s.agent_working);
        assert!(!h.bridge.idle_pending(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_cancels_timer_and_finishes_recording() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(command("aider")).await.unwrap();
        let rec = h
            .bridge
            .start_recording(&id, StartRecording::default())
            .await
            .unwrap();
        h.bridge.send_input(&id, "/help\r", InputSource::User).await.unwrap();
        h.output(&id, "working").await;
        assert!(h.bridge.idle_pending(&id));

        h.host_tx
            .send(HostEvent::Exit {
                session_id: id.clone(),
                exit_code: Some(3),
            })
            .unwrap();
        let inbound = h.inbox.recv().await.unwrap();
        h.bridge.dispatch(inbound).await;

        let s = h.bridge.session(&id).unwrap();
        assert!(s.exited);
        assert_eq!(s.exit_code, Some(3));
        assert!(!s.agent_working);
        assert!(!s.recording_active);
        assert_eq!(s.last_recording_id.as_deref(), Some(rec.as_str()));
        assert!(!h.bridge.idle_pending(&id));
        assert_eq!(h.bridge.store().load(&rec).await.unwrap().events.len(), 1);

        h.output(&id, "late").await;
        assert!(!h.working(&id));
    }

    #[tokio::test]
    async fn recording_captures_user_input_only() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(command("codex")).await.unwrap();
        let rec = h
            .bridge
            .start_recording(
                &id,
                StartRecording {
                    recording_id: Some("my rec".into()),
                    name: Some("demo".into()),
                    project_id: "proj".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rec, "my_rec");
        assert!(h.bridge.session(&id).unwrap().recording_active);

        h.bridge.send_input(&id, "ls\r", InputSource::User).await.unwrap();
        h.bridge.send_input(&id, "pasted", InputSource::System).await.unwrap();

        let err = h
            .bridge
            .start_recording(&id, StartRecording::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeckError::AlreadyRecording(_)));

        assert_eq!(h.bridge.stop_recording(&id).await.unwrap(), "my_rec");
        assert!(matches!(
            h.bridge.stop_recording(&id).await,
            Err(DeckError::NotRecording(_))
        ));

        let saved = h.bridge.store().load("my_rec").await.unwrap();
        assert_eq!(saved.events.len(), 1);
        assert_eq!(saved.events[0].data, "ls\r");
        let meta = saved.meta.unwrap();
        assert_eq!(meta.effect_id.as_deref(), Some("codex"));
        assert_eq!(meta.bootstrap_command.as_deref(), Some("codex"));
        assert_eq!(meta.project_id, "proj");
        assert_eq!(
            meta.session_persist_id,
            h.bridge.session(&id).unwrap().persist_id
        );
        assert_eq!(
            h.bridge.session(&id).unwrap().last_recording_id.as_deref(),
            Some("my_rec")
        );

        let errors = h
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, BridgeEvent::Error { .. }))
            .count();
        assert_eq!(errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn replay_failure_keeps_index_and_retry_advances_once() {
        let mut h = Harness::new();
        let events = vec![
            RecordingEvent {
                t: 0,
                data: "echo hi\r".into(),
            },
            RecordingEvent {
                t: 10,
                data: "\x1b[31mwarn\x1b[0m\ndone".into(),
            },
        ];
        let meta = RecordingMeta {
            schema_version: SCHEMA_VERSION,
            created_at: 1,
            name: None,
            project_id: "p".into(),
            session_persist_id: "x".into(),
            cwd: Some("/work".into()),
            effect_id: None,
            bootstrap_command: None,
        };
        h.bridge.store().save("r1", &meta, &events).await.unwrap();

        let mut replay = h.bridge.open_replay("r1").await.unwrap();
        assert_eq!(replay.steps(), ["echo hi\r", "warn\n", "done"]);

        h.host.fail_writes.store(true, Ordering::SeqCst);
        assert!(h.bridge.replay_next(&mut replay).await.is_err());
        assert_eq!(replay.index(), 0);
        let target = replay.target().unwrap().to_string();

        h.host.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(h.bridge.replay_next(&mut replay).await.unwrap(), 1);
        assert_eq!(replay.target(), Some(target.as_str()));
        assert_eq!(h.host.creates.lock().unwrap().len(), 1);
        assert_eq!(h.host.creates.lock().unwrap()[0].cwd.as_deref(), Some("/work"));
        assert_eq!(h.host.writes(), vec!["echo hi", "\r"]);
        assert!(h
            .host
            .writes
            .lock()
            .unwrap()
            .iter()
            .all(|(_, _, source)| *source == InputSource::System));

        assert_eq!(h.bridge.replay_next(&mut replay).await.unwrap(), 2);
        assert_eq!(h.bridge.replay_next(&mut replay).await.unwrap(), 3);
        assert!(replay.is_finished());
        assert!(h.bridge.replay_next(&mut replay).await.is_err());
        assert_eq!(replay.index(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn replay_retry_does_not_resend_delivered_body() {
        let mut h = Harness::new();
        let meta = RecordingMeta {
            schema_version: SCHEMA_VERSION,
            created_at: 1,
            name: None,
            project_id: "p".into(),
            session_persist_id: "x".into(),
            cwd: None,
            effect_id: None,
            bootstrap_command: None,
        };
        let events = vec![RecordingEvent {
            t: 0,
            data: "echo hi\r".into(),
        }];
        h.bridge.store().save("r2", &meta, &events).await.unwrap();
        let mut replay = h.bridge.open_replay("r2").await.unwrap();
        assert_eq!(replay.steps(), ["echo hi\r"]);

        *h.host.fail_data.lock().unwrap() = Some("\r".into());
        assert!(h.bridge.replay_next(&mut replay).await.is_err());
        assert_eq!(replay.index(), 0);
        assert_eq!(h.host.writes(), vec!["echo hi"]);

        *h.host.fail_data.lock().unwrap() = None;
        assert_eq!(h.bridge.replay_next(&mut replay).await.unwrap(), 1);
        assert_eq!(h.host.writes(), vec!["echo hi", "\r"]);
        assert!(replay.is_finished());
    }

    #[tokio::test]
    async fn persistent_scroll_gestures() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(persistent(None)).await.unwrap();

        h.bridge.send_input(&id, "\x1b[6;2~", InputSource::User).await.unwrap();
        assert!(h.host.writes().is_empty());

        h.bridge.send_input(&id, "\x1b[5;2~", InputSource::User).await.unwrap();
        h.bridge.scroll(&id, ScrollGesture::PageDown).await.unwrap();
        h.bridge.send_input(&id, "q", InputSource::User).await.unwrap();
        let writes = h.host.writes();
        assert_eq!(writes[0], format!("\x13{}", "k".repeat(24)));
        assert_eq!(writes[1], "j".repeat(24));
        assert_eq!(writes[2], "\x1bq");

        let plain = h.bridge.open_session(CreateRequest::default()).await.unwrap();
        assert!(matches!(
            h.bridge.scroll(&plain, ScrollGesture::PageUp).await,
            Err(DeckError::NotPersistent(_))
        ));
    }

    #[tokio::test]
    async fn typed_agent_launch_is_classified() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(persistent(None)).await.unwrap();
        assert_eq!(h.bridge.session(&id).unwrap().effect_id, None);

        for chunk in ["cod", "\x7f", "dex\r"] {
            h.bridge.send_input(&id, chunk, InputSource::User).await.unwrap();
        }
        assert_eq!(h.bridge.session(&id).unwrap().effect_id.as_deref(), Some("codex"));

        h.bridge
            .send_input(&id, "fix the tests\r", InputSource::User)
            .await
            .unwrap();
        assert_eq!(h.bridge.session(&id).unwrap().effect_id.as_deref(), Some("codex"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_timer_and_discards_buffer() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(command("gemini")).await.unwrap();
        h.output(&id, "buffered").await;
        assert!(h.bridge.idle_pending(&id));

        h.bridge.close_session(&id).await.unwrap();
        assert!(h.bridge.session(&id).is_none());
        assert!(!h.bridge.idle_pending(&id));
        assert!(h.bridge.relay().queued(&id).is_empty());
        assert_eq!(*h.host.closes.lock().unwrap(), vec![id.clone()]);

        h.output(&id, "straggler").await;
        assert!(h.bridge.relay().queued(&id).is_empty());
        assert!(h
            .drain_events()
            .contains(&BridgeEvent::Closed { session_id: id }));
    }

    #[tokio::test]
    async fn failed_close_keeps_session() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(CreateRequest::default()).await.unwrap();
        h.host.fail_close.store(true, Ordering::SeqCst);
        assert!(h.bridge.close_session(&id).await.is_err());
        let s = h.bridge.session(&id).unwrap();
        assert!(!s.closing);
    }

    #[tokio::test]
    async fn write_failure_is_reported_not_recorded() {
        let mut h = Harness::new();
        let id = h.bridge.open_session(CreateRequest::default()).await.unwrap();
        h.bridge
            .start_recording(&id, StartRecording::default())
            .await
            .unwrap();
        h.host.fail_writes.store(true, Ordering::SeqCst);
        assert!(h.bridge.send_input(&id, "x", InputSource::User).await.is_err());
        h.host.fail_writes.store(false, Ordering::SeqCst);
        let rec = h.bridge.stop_recording(&id).await.unwrap();
        assert!(h.bridge.store().load(&rec).await.unwrap().events.is_empty());
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, BridgeEvent::Error { session_id: Some(s), .. } if *s == id)));
    }
}

//! Process host backed by portable-pty.
//!
//! Each session is a pseudo-terminal running either the user's shell, a
//! shell-wrapped command, or (for persistent sessions) a multiplexer client
//! attached to a named multiplexer session. Output is read on a blocking
//! thread, decoded as UTF-8 and pushed to the bridge as [`HostEvent`]s.

use crate::host::{CreateRequest, HostEvent, ProcessHost, SessionId, SessionInfo};
use crate::shell_hooks::{self, BASH_PROMPT_HOOK};
use deckhand_core::{DeckError, DeckResult, InputSource};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const READ_BUF_SIZE: usize = 8192;

/// How persistent sessions reach the multiplexer.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Multiplexer executable (e.g. `zellij`).
    pub program: String,
    /// Prefix applied to persist ids to form multiplexer session names.
    pub session_prefix: String,
}

impl MultiplexerConfig {
    fn session_name(&self, persist_id: &str) -> String {
        format!("{}{}", self.session_prefix, persist_id)
    }
}

struct PtySession {
    name: String,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    persist_id: Option<String>,
    _zdotdir: Option<TempDir>,
}

struct PtyHostInner {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, PtySession>>,
    events: mpsc::UnboundedSender<HostEvent>,
    multiplexer: MultiplexerConfig,
}

/// A managed set of PTY sessions.
#[derive(Clone)]
pub struct PtyHost {
    inner: Arc<PtyHostInner>,
}

struct Launch {
    program: String,
    args: Vec<String>,
    shown: String,
}

impl PtyHost {
    pub fn new(events: mpsc::UnboundedSender<HostEvent>, multiplexer: MultiplexerConfig) -> Self {
        Self {
            inner: Arc::new(PtyHostInner {
                next_id: AtomicU64::new(1),
                sessions: Mutex::new(HashMap::new()),
                events,
                multiplexer,
            }),
        }
    }

    fn with_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut PtySession) -> DeckResult<R>,
    ) -> DeckResult<R> {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .map_err(|_| DeckError::Host("session table poisoned".into()))?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| DeckError::SessionNotFound(session_id.to_string()))?;
        f(session)
    }

    fn take_session(&self, session_id: &str) -> DeckResult<Option<PtySession>> {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .map_err(|_| DeckError::Host("session table poisoned".into()))?;
        Ok(sessions.remove(session_id))
    }

    fn launch_for(&self, request: &CreateRequest, command: &str) -> DeckResult<Launch> {
        if request.persistent {
            let persist_id = request
                .persist_id
                .as_deref()
                .ok_or_else(|| DeckError::Host("persistent session needs a persist id".into()))?;
            let mux = &self.inner.multiplexer;
            let name = mux.session_name(persist_id);
            return Ok(Launch {
                program: mux.program.clone(),
                args: vec!["attach".into(), "--create".into(), name.clone()],
                shown: format!("{} attach --create {name}", mux.program),
            });
        }

        let shell = default_shell();
        #[cfg(unix)]
        let launch = if command.is_empty() {
            Launch {
                program: shell.clone(),
                args: vec!["-l".into()],
                shown: format!("{shell} -l"),
            }
        } else {
            Launch {
                program: shell.clone(),
                args: vec!["-lc".into(), command.to_string()],
                shown: format!("{shell} -lc {command}"),
            }
        };
        #[cfg(not(unix))]
        let launch = if command.is_empty() {
            Launch {
                program: shell.clone(),
                args: Vec::new(),
                shown: shell.clone(),
            }
        } else {
            Launch {
                program: shell.clone(),
                args: vec!["/C".into(), command.to_string()],
                shown: format!("{shell} /C {command}"),
            }
        };
        Ok(launch)
    }

    fn spawn(&self, request: CreateRequest) -> DeckResult<SessionInfo> {
        let command = request
            .command
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        let is_shell = command.is_empty();
        let cwd = resolve_cwd(request.cwd.as_deref());
        let launch = self.launch_for(&request, &command)?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DeckError::Host(format!("openpty failed: {e}")))?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        let mut cmd = CommandBuilder::new(&launch.program);
        cmd.args(&launch.args);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &request.env_vars {
            cmd.env(key, value);
        }
        if let Some(ref dir) = cwd {
            cmd.cwd(dir);
        }
        let mut zdotdir = None;
        if is_shell && !request.persistent && shell_hooks::is_bash(&launch.program) {
            if let Ok(orig) = std::env::var("PROMPT_COMMAND") {
                cmd.env("DECKHAND_ORIG_PROMPT_COMMAND", orig);
            }
            cmd.env("PROMPT_COMMAND", BASH_PROMPT_HOOK);
        }
        if is_shell && !request.persistent && shell_hooks::is_zsh(&launch.program) {
            let user_dir = std::env::var("ZDOTDIR")
                .ok()
                .filter(|d| Path::new(d).is_dir())
                .or_else(home_dir);
            if let Some(user_dir) = user_dir {
                match shell_hooks::zsh_dotdir(Path::new(&user_dir)) {
                    Ok(dir) => {
                        cmd.env("ZDOTDIR", dir.path());
                        zdotdir = Some(dir);
                    }
                    Err(e) => warn!("zsh integration unavailable: {e}"),
                }
            }
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DeckError::Host(format!("spawn failed: {e}")))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| DeckError::Host(format!("clone reader failed: {e}")))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| DeckError::Host(format!("take writer failed: {e}")))?;

        // The multiplexer starts a plain shell; type the command into it.
        if request.persistent && !is_shell {
            writer.write_all(format!("{command}\r").as_bytes())?;
            writer.flush()?;
        }

        let name = {
            let mut sessions = self
                .inner
                .sessions
                .lock()
                .map_err(|_| DeckError::Host("session table poisoned".into()))?;
            let base = request
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(if is_shell { "shell" } else { "agent" });
            let name = unique_name(sessions.values().map(|s| s.name.as_str()), base);
            sessions.insert(
                id.clone(),
                PtySession {
                    name: name.clone(),
                    master: pair.master,
                    writer,
                    child,
                    persist_id: request.persist_id.clone().filter(|_| request.persistent),
                    _zdotdir: zdotdir,
                },
            );
            name
        };

        info!(session_id = %id, name = %name, command = %launch.shown, "PTY spawned");

        let inner = self.inner.clone();
        let reader_id = id.clone();
        tokio::task::spawn_blocking(move || inner.pump_output(reader_id, reader));

        Ok(SessionInfo {
            id,
            name,
            command: launch.shown,
            cwd,
        })
    }

    async fn run_multiplexer(&self, args: &[&str]) -> DeckResult<std::process::Output> {
        tokio::process::Command::new(&self.inner.multiplexer.program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                DeckError::Host(format!(
                    "failed to run {}: {e}",
                    self.inner.multiplexer.program
                ))
            })
    }
}

impl PtyHostInner {
    /// Blocking read loop for one session. Ends with an exit notification.
    fn pump_output(&self, session_id: SessionId, mut reader: Box<dyn Read + Send>) {
        let mut buf = [0u8; READ_BUF_SIZE];
        let mut decoder = Utf8Decoder::default();
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let data = decoder.decode(&buf[..n]);
                    if !data.is_empty() {
                        let _ = self.events.send(HostEvent::Output {
                            session_id: session_id.clone(),
                            data,
                        });
                    }
                }
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "PTY read ended");
                    break;
                }
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            let _ = self.events.send(HostEvent::Output {
                session_id: session_id.clone(),
                data: tail,
            });
        }

        let session = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&session_id),
            Err(_) => None,
        };
        let exit_code =
            session.and_then(|mut s| s.child.wait().ok().map(|status| status.exit_code()));

        info!(session_id = %session_id, exit_code = ?exit_code, "PTY child exited");
        let _ = self.events.send(HostEvent::Exit {
            session_id,
            exit_code,
        });
    }
}

impl ProcessHost for PtyHost {
    async fn create(&self, request: CreateRequest) -> DeckResult<SessionInfo> {
        self.spawn(request)
    }

    async fn write(&self, session_id: &str, data: &str, _source: InputSource) -> DeckResult<()> {
        self.with_session(session_id, |s| {
            s.writer
                .write_all(data.as_bytes())
                .map_err(|e| DeckError::Host(format!("write failed: {e}")))?;
            s.writer.flush().ok();
            Ok(())
        })
    }

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> DeckResult<()> {
        self.with_session(session_id, |s| {
            s.master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| DeckError::Host(format!("resize failed: {e}")))
        })?;
        debug!(session_id, cols, rows, "PTY resized");
        Ok(())
    }

    async fn close(&self, session_id: &str) -> DeckResult<()> {
        let Some(session) = self.take_session(session_id)? else {
            return Ok(());
        };
        let PtySession {
            mut child,
            persist_id,
            ..
        } = session;
        let _ = child.kill();
        tokio::task::spawn_blocking(move || {
            let _ = child.wait();
        });
        if let Some(persist_id) = persist_id {
            self.kill_persistent(&persist_id).await?;
        }
        info!(session_id, "session closed");
        Ok(())
    }

    async fn detach(&self, session_id: &str) -> DeckResult<()> {
        let persistent = self.with_session(session_id, |s| Ok(s.persist_id.is_some()))?;
        if !persistent {
            return Err(DeckError::NotPersistent(session_id.to_string()));
        }
        if let Some(mut session) = self.take_session(session_id)? {
            let _ = session.child.kill();
            tokio::task::spawn_blocking(move || {
                let _ = session.child.wait();
            });
        }
        info!(session_id, "detached from persistent session");
        Ok(())
    }

    async fn list_persistent(&self) -> DeckResult<Vec<String>> {
        let output = self
            .run_multiplexer(&["list-sessions", "--short", "--no-formatting"])
            .await?;
        if !output.status.success() {
            // The multiplexer exits non-zero when there are no sessions.
            return Ok(Vec::new());
        }
        let prefix = &self.inner.multiplexer.session_prefix;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn kill_persistent(&self, persist_id: &str) -> DeckResult<()> {
        let name = self.inner.multiplexer.session_name(persist_id);
        let output = self.run_multiplexer(&["kill-session", &name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(session = %name, stderr = %stderr.trim(), "kill-session failed");
            return Err(DeckError::Host(format!(
                "kill-session {name} failed: {}",
                stderr.trim()
            )));
        }
        info!(session = %name, "persistent session killed");
        Ok(())
    }
}

/// Incremental UTF-8 decoder that holds back an incomplete trailing
/// sequence until the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if chunk.is_empty() {
            return String::new();
        }
        self.carry.extend_from_slice(chunk);

        let mut out = String::new();
        let mut idx = 0usize;
        while idx < self.carry.len() {
            match std::str::from_utf8(&self.carry[idx..]) {
                Ok(s) => {
                    out.push_str(s);
                    idx = self.carry.len();
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.carry[idx..idx + valid]));
                    idx += valid;
                    match e.error_len() {
                        None => break,
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            idx = (idx + len).min(self.carry.len());
                        }
                    }
                }
            }
        }
        self.carry.drain(..idx);
        out
    }

    /// Flush whatever is left, lossily.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        out
    }
}

/// `base`, or `base-2`, `base-3`, ... if already taken.
pub fn unique_name<'a>(existing: impl Iterator<Item = &'a str>, base: &str) -> String {
    let taken: HashSet<&str> = existing.collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
}

fn home_dir() -> Option<String> {
    dirs::home_dir().map(|p| p.to_string_lossy().to_string())
}

/// Requested directory if it exists, else the home directory.
fn resolve_cwd(requested: Option<&str>) -> Option<String> {
    requested
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && Path::new(s).is_dir())
        .or_else(|| home_dir().filter(|h| Path::new(h).is_dir()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_holds_split_multibyte() {
        let mut dec = Utf8Decoder::default();
        let bytes = "é!".as_bytes();
        assert_eq!(dec.decode(&bytes[..1]), "");
        assert_eq!(dec.decode(&bytes[1..]), "é!");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut dec = Utf8Decoder::default();
        assert_eq!(dec.decode(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn decoder_flushes_incomplete_tail() {
        let mut dec = Utf8Decoder::default();
        assert_eq!(dec.decode(b"ok\xe2\x82"), "ok");
        assert_eq!(dec.finish(), "\u{fffd}");
    }

    #[test]
    fn unique_names() {
        let names = ["shell", "shell-2"];
        assert_eq!(unique_name(names.iter().copied(), "shell"), "shell-3");
        assert_eq!(unique_name(names.iter().copied(), "codex"), "codex");
    }

    #[test]
    fn multiplexer_session_names() {
        let mux = MultiplexerConfig {
            program: "zellij".into(),
            session_prefix: "deckhand-".into(),
        };
        assert_eq!(mux.session_name("abc"), "deckhand-abc");
    }

    #[test]
    fn missing_cwd_falls_back() {
        let cwd = resolve_cwd(Some("/definitely/not/a/dir"));
        assert_ne!(cwd.as_deref(), Some("/definitely/not/a/dir"));
    }

    #[tokio::test]
    async fn unknown_session_write_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let host = PtyHost::new(
            tx,
            MultiplexerConfig {
                program: "zellij".into(),
                session_prefix: "deckhand-".into(),
            },
        );
        let err = host.write("nope", "x", InputSource::User).await.unwrap_err();
        assert!(matches!(err, DeckError::SessionNotFound(_)));
        assert!(host.close("nope").await.is_ok());
    }
}

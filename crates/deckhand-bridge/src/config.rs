//! Bridge configuration: TOML file + CLI overrides.

use crate::bridge::BridgeSettings;
use crate::persistent::ScrollConfig;
use crate::pty::MultiplexerConfig;
use crate::replay::ReplayTiming;
use deckhand_core::{DeckError, DeckResult, Effect, EffectCatalog, DEFAULT_IDLE_AFTER_MS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "~/.deckhand/config.toml";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub buffer: BufferSection,
    #[serde(default)]
    pub idle: IdleSection,
    #[serde(default)]
    pub replay: ReplaySection,
    #[serde(default)]
    pub persistent: PersistentSection,
    #[serde(default)]
    pub recordings: RecordingsSection,
    #[serde(default)]
    pub effects: Vec<EffectEntry>,
}

/// `[buffer]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferSection {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_chunks: default_max_chunks(),
        }
    }
}

/// `[idle]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct IdleSection {
    #[serde(default = "default_idle_ms")]
    pub default_idle_ms: u64,
}

impl Default for IdleSection {
    fn default() -> Self {
        Self {
            default_idle_ms: default_idle_ms(),
        }
    }
}

/// `[replay]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplaySection {
    #[serde(default = "default_submit_delay_ms")]
    pub submit_delay_ms: u64,
    #[serde(default = "default_repeat_delay_ms")]
    pub repeat_delay_ms: u64,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            submit_delay_ms: default_submit_delay_ms(),
            repeat_delay_ms: default_repeat_delay_ms(),
        }
    }
}

/// `[persistent]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistentSection {
    #[serde(default = "default_multiplexer")]
    pub multiplexer: String,
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    #[serde(default = "default_pixels_per_line")]
    pub pixels_per_line: f64,
    #[serde(default = "default_scroll_mode_key")]
    pub scroll_mode_key: u8,
}

impl Default for PersistentSection {
    fn default() -> Self {
        Self {
            multiplexer: default_multiplexer(),
            session_prefix: default_session_prefix(),
            pixels_per_line: default_pixels_per_line(),
            scroll_mode_key: default_scroll_mode_key(),
        }
    }
}

/// `[recordings]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingsSection {
    #[serde(default = "default_recordings_dir")]
    pub dir: String,
}

impl Default for RecordingsSection {
    fn default() -> Self {
        Self {
            dir: default_recordings_dir(),
        }
    }
}

/// `[[effects]]` entry: an extra agent to recognise.
#[derive(Debug, Clone, Deserialize)]
pub struct EffectEntry {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub match_commands: Vec<String>,
    #[serde(default)]
    pub idle_after_ms: Option<u64>,
}

fn default_max_sessions() -> usize {
    32
}
fn default_max_chunks() -> usize {
    2000
}
fn default_idle_ms() -> u64 {
    DEFAULT_IDLE_AFTER_MS
}
fn default_submit_delay_ms() -> u64 {
    60
}
fn default_repeat_delay_ms() -> u64 {
    40
}
fn default_multiplexer() -> String {
    "zellij".to_string()
}
fn default_session_prefix() -> String {
    "deckhand-".to_string()
}
fn default_pixels_per_line() -> f64 {
    40.0
}
fn default_scroll_mode_key() -> u8 {
    0x13
}
fn default_recordings_dir() -> String {
    "~/.deckhand/recordings".to_string()
}

/// Values given on the command line, taking precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub recordings_dir: Option<PathBuf>,
    pub multiplexer: Option<String>,
}

/// Resolved configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub max_sessions: usize,
    pub max_chunks: usize,
    pub default_idle_ms: u64,
    pub submit_delay: Duration,
    pub repeat_delay: Duration,
    pub multiplexer: String,
    pub session_prefix: String,
    pub pixels_per_line: f64,
    pub scroll_mode_key: char,
    pub recordings_dir: PathBuf,
    pub extra_effects: Vec<EffectEntry>,
}

impl BridgeConfig {
    /// Load config from a TOML file (defaults if absent), then apply
    /// overrides.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> DeckResult<Self> {
        let path = config_path
            .map(expand_tilde)
            .unwrap_or_else(|| expand_tilde_str(DEFAULT_CONFIG_PATH));
        let file = if path.exists() {
            info!(path = %path.display(), "loading config file");
            let content = std::fs::read_to_string(&path)?;
            Self::parse(&content)?
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            ConfigFile::default()
        };
        Ok(Self::resolve(file, overrides))
    }

    pub fn parse(content: &str) -> DeckResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| DeckError::Other(format!("config parse error: {e}")))
    }

    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> Self {
        let recordings_dir = overrides
            .recordings_dir
            .unwrap_or_else(|| expand_tilde_str(&file.recordings.dir));
        Self {
            max_sessions: file.buffer.max_sessions,
            max_chunks: file.buffer.max_chunks,
            default_idle_ms: file.idle.default_idle_ms,
            submit_delay: Duration::from_millis(file.replay.submit_delay_ms),
            repeat_delay: Duration::from_millis(file.replay.repeat_delay_ms),
            multiplexer: overrides.multiplexer.unwrap_or(file.persistent.multiplexer),
            session_prefix: file.persistent.session_prefix,
            pixels_per_line: file.persistent.pixels_per_line,
            scroll_mode_key: char::from(file.persistent.scroll_mode_key),
            recordings_dir,
            extra_effects: file.effects,
        }
    }

    /// Built-in effects followed by configured ones. Effects without an
    /// idle period get the configured default.
    pub fn catalog(&self) -> EffectCatalog {
        let extra = self.extra_effects.iter().map(|e| Effect {
            id: e.id.clone(),
            label: e.label.clone().unwrap_or_else(|| e.id.clone()),
            match_commands: e
                .match_commands
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
            idle_after_ms: e.idle_after_ms,
        });
        let merged = EffectCatalog::builtin().with_extra(extra);
        EffectCatalog::new(
            merged
                .effects()
                .iter()
                .cloned()
                .map(|mut e| {
                    e.idle_after_ms.get_or_insert(self.default_idle_ms);
                    e
                })
                .collect(),
        )
    }

    pub fn multiplexer(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            program: self.multiplexer.clone(),
            session_prefix: self.session_prefix.clone(),
        }
    }

    pub fn settings(&self) -> BridgeSettings {
        BridgeSettings {
            max_sessions: self.max_sessions,
            max_chunks: self.max_chunks,
            timing: ReplayTiming {
                submit_delay: self.submit_delay,
                repeat_delay: self.repeat_delay,
            },
            scroll: ScrollConfig {
                enter_key: self.scroll_mode_key,
                pixels_per_line: self.pixels_per_line,
            },
            catalog: self.catalog(),
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = BridgeConfig::resolve(BridgeConfig::parse("").unwrap(), ConfigOverrides::default());
        assert_eq!(cfg.max_sessions, 32);
        assert_eq!(cfg.max_chunks, 2000);
        assert_eq!(cfg.submit_delay, Duration::from_millis(60));
        assert_eq!(cfg.repeat_delay, Duration::from_millis(40));
        assert_eq!(cfg.multiplexer, "zellij");
        assert_eq!(cfg.scroll_mode_key, '\x13');
        assert!(cfg.recordings_dir.ends_with(".deckhand/recordings"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let file = BridgeConfig::parse(
            r#"
[buffer]
max_chunks = 10

[persistent]
session_prefix = "dh-"
"#,
        )
        .unwrap();
        let cfg = BridgeConfig::resolve(file, ConfigOverrides::default());
        assert_eq!(cfg.max_chunks, 10);
        assert_eq!(cfg.max_sessions, 32);
        assert_eq!(cfg.session_prefix, "dh-");
        assert_eq!(cfg.multiplexer().session_prefix, "dh-");
    }

    #[test]
    fn overrides_win() {
        let cfg = BridgeConfig::resolve(
            BridgeConfig::parse("[recordings]\ndir = \"/data/recs\"\n").unwrap(),
            ConfigOverrides {
                recordings_dir: Some(PathBuf::from("/tmp/elsewhere")),
                multiplexer: Some("/opt/zellij".into()),
            },
        );
        assert_eq!(cfg.recordings_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(cfg.multiplexer, "/opt/zellij");
    }

    #[test]
    fn extra_effects_and_default_idle() {
        let file = BridgeConfig::parse(
            r#"
[idle]
default_idle_ms = 5000

[[effects]]
id = "qwen"
match_commands = ["Qwen"]
"#,
        )
        .unwrap();
        let catalog = BridgeConfig::resolve(file, ConfigOverrides::default()).catalog();
        let qwen = catalog.classify(Some("qwen --yolo"), None).unwrap();
        assert_eq!(qwen.label, "qwen");
        assert_eq!(qwen.idle_after(), Duration::from_millis(5000));
        assert_eq!(
            catalog.get("codex").unwrap().idle_after(),
            Duration::from_millis(2500)
        );
        assert_eq!(
            catalog.get("gemini").unwrap().idle_after(),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(matches!(
            BridgeConfig::parse("[buffer]\nmax_chunks = \"many\""),
            Err(DeckError::Other(_))
        ));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BridgeConfig::load(
            Some(&dir.path().join("absent.toml")),
            ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.default_idle_ms, 2000);
    }
}

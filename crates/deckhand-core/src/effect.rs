//! Effect catalog: recognises agent launches from a command line.
//!
//! An effect is a known agent/tool identified by the executable that starts
//! it. Classification is a pure function of the command line and the session
//! name, so the same input always yields the same effect.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Idle period used when an effect does not specify one.
pub const DEFAULT_IDLE_AFTER_MS: u64 = 2000;

/// Executable suffixes stripped before matching.
const EXECUTABLE_SUFFIXES: &[&str] = &[".exe", ".cmd", ".bat"];

/// A catalog entry describing one recognised agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    pub id: String,
    pub label: String,
    /// Normalized executable names that identify this effect.
    pub match_commands: Vec<String>,
    /// Quiet period after which a working session is considered idle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_after_ms: Option<u64>,
}

impl Effect {
    pub fn new(id: &str, label: &str, match_commands: &[&str], idle_after_ms: Option<u64>) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            match_commands: match_commands.iter().map(|c| c.to_string()).collect(),
            idle_after_ms,
        }
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_millis(self.idle_after_ms.unwrap_or(DEFAULT_IDLE_AFTER_MS))
    }

    fn matches(&self, normalized: &str) -> bool {
        self.match_commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(normalized))
    }
}

/// Read-only list of known effects. First match wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectCatalog {
    effects: Vec<Effect>,
}

impl EffectCatalog {
    pub fn new(effects: Vec<Effect>) -> Self {
        Self { effects }
    }

    /// The agents recognised out of the box.
    pub fn builtin() -> Self {
        Self::new(vec![
            Effect::new("codex", "Codex", &["codex"], Some(2500)),
            Effect::new("claude", "Claude Code", &["claude"], Some(2500)),
            Effect::new("gemini", "Gemini CLI", &["gemini"], None),
            Effect::new("opencode", "OpenCode", &["opencode"], None),
            Effect::new("aider", "Aider", &["aider"], Some(3000)),
            Effect::new("goose", "Goose", &["goose"], None),
            Effect::new("cursor-agent", "Cursor Agent", &["cursor-agent"], None),
        ])
    }

    /// Append extra entries after the existing ones.
    pub fn with_extra(mut self, extra: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(extra);
        self
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn get(&self, id: &str) -> Option<&Effect> {
        self.effects.iter().find(|e| e.id == id)
    }

    /// Classify a session by its command line, falling back to its name
    /// when no command line is given.
    pub fn classify(&self, command_line: Option<&str>, name: Option<&str>) -> Option<&Effect> {
        let source = command_line
            .filter(|c| !c.trim().is_empty())
            .or(name)?;
        let normalized = normalize_command(source)?;
        self.effects.iter().find(|e| e.matches(&normalized))
    }
}

/// First whitespace-delimited token, without path prefix or executable
/// suffix, lowercased. `None` for blank input.
pub fn normalize_command(command_line: &str) -> Option<String> {
    let first = command_line.split_whitespace().next()?;
    let first = first.trim_matches(|c| c == '"' || c == '\'');
    let base = first.rsplit(['/', '\\']).next().unwrap_or(first);
    let mut lowered = base.to_ascii_lowercase();
    for suffix in EXECUTABLE_SUFFIXES {
        if let Some(stripped) = lowered.strip_suffix(suffix) {
            lowered = stripped.to_string();
            break;
        }
    }
    if lowered.is_empty() {
        None
    } else {
        Some(lowered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefix_and_flags_are_ignored() {
        let catalog = EffectCatalog::builtin();
        let a = catalog.classify(Some("/usr/local/bin/codex --flag"), None);
        let b = catalog.classify(Some("codex"), None);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(a.map(|e| e.id.as_str()), Some("codex"));
    }

    #[test]
    fn unknown_command_is_none() {
        let catalog = EffectCatalog::builtin();
        assert!(catalog.classify(Some("not-a-real-agent"), None).is_none());
        assert!(catalog.classify(None, None).is_none());
        assert!(catalog.classify(Some("   "), None).is_none());
    }

    #[test]
    fn name_is_used_without_command() {
        let catalog = EffectCatalog::builtin();
        let effect = catalog.classify(None, Some("claude"));
        assert_eq!(effect.map(|e| e.id.as_str()), Some("claude"));
        let effect = catalog.classify(Some(""), Some("Claude"));
        assert_eq!(effect.map(|e| e.id.as_str()), Some("claude"));
    }

    #[test]
    fn windows_suffix_and_case() {
        assert_eq!(
            normalize_command(r"C:\Tools\Codex.EXE exec").as_deref(),
            Some("codex")
        );
    }

    #[test]
    fn first_match_wins() {
        let catalog = EffectCatalog::new(vec![
            Effect::new("a", "A", &["tool"], None),
            Effect::new("b", "B", &["tool"], None),
        ]);
        assert_eq!(catalog.classify(Some("tool"), None).map(|e| e.id.as_str()), Some("a"));
    }

    #[test]
    fn idle_default() {
        let effect = Effect::new("x", "X", &["x"], None);
        assert_eq!(effect.idle_after(), Duration::from_millis(DEFAULT_IDLE_AFTER_MS));
    }
}

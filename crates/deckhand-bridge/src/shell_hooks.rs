//! Shell integration for local shells.
//!
//! Shells started by [`PtyHost`](crate::PtyHost) report their working
//! directory and the command line about to run as OSC 1337 marks, which the
//! bridge reads back out of session output. Bash gets a `PROMPT_COMMAND`;
//! zsh gets a private `ZDOTDIR` whose startup files source the user's own
//! and then install `precmd`/`preexec` hooks.

use std::fs;
use std::io;
use std::path::Path;
use tempfile::TempDir;

/// Prompt hook for bash: report the working directory and that no command
/// is running.
pub(crate) const BASH_PROMPT_HOOK: &str = "printf '\\033]1337;CurrentDir=%s\\007\\033]1337;Command=\\007' \"$PWD\"; \
if [ -n \"$DECKHAND_ORIG_PROMPT_COMMAND\" ]; then eval \"$DECKHAND_ORIG_PROMPT_COMMAND\"; fi";

const ZSH_HOOKS: &str = r#"
__deckhand_emit_cwd() {
  printf '\033]1337;CurrentDir=%s\007' "$PWD"
  printf '\033]1337;Command=\007'
}

__deckhand_emit_command() { printf '\033]1337;Command=%s\007' "$1"; }

typeset -ga precmd_functions preexec_functions
precmd_functions+=__deckhand_emit_cwd
preexec_functions+=__deckhand_emit_command
__deckhand_emit_cwd
"#;

/// Quote `s` for a POSIX shell.
pub(crate) fn sh_single_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

pub(crate) fn is_bash(program: &str) -> bool {
    shell_name(program).contains("bash")
}

pub(crate) fn is_zsh(program: &str) -> bool {
    shell_name(program).contains("zsh")
}

fn shell_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Build a temporary `ZDOTDIR` for one zsh session. Each startup file points
/// `ZDOTDIR` back at `user_dir` while sourcing the user's file of the same
/// name; `.zshrc` then adds the hooks. Removed when the returned guard drops.
pub(crate) fn zsh_dotdir(user_dir: &Path) -> io::Result<TempDir> {
    let dir = tempfile::Builder::new().prefix("deckhand-zdotdir-").tempdir()?;
    write_zsh_startup_files(dir.path(), user_dir)?;
    Ok(dir)
}

fn write_zsh_startup_files(dir: &Path, user_dir: &Path) -> io::Result<()> {
    let user_dir_quoted = sh_single_quote(&user_dir.to_string_lossy());
    let wrap = |file: &str, restore: bool| {
        let user_file = sh_single_quote(&user_dir.join(file).to_string_lossy());
        let mut out = String::new();
        out.push_str("typeset -g __deckhand_zdotdir=\"$ZDOTDIR\"\n");
        out.push_str(&format!("export ZDOTDIR={user_dir_quoted}\n"));
        out.push_str(&format!("if [ -f {user_file} ]; then source {user_file}; fi\n"));
        // Later startup files are looked up through ZDOTDIR.
        if restore {
            out.push_str("export ZDOTDIR=\"$__deckhand_zdotdir\"\n");
        }
        out.push_str("unset __deckhand_zdotdir\n");
        out
    };

    fs::write(dir.join(".zshenv"), wrap(".zshenv", true))?;
    fs::write(dir.join(".zprofile"), wrap(".zprofile", true))?;
    fs::write(dir.join(".zlogin"), wrap(".zlogin", false))?;
    let mut zshrc = wrap(".zshrc", false);
    zshrc.push_str(ZSH_HOOKS);
    fs::write(dir.join(".zshrc"), zshrc)?;
    Ok(())
}

use assert_cmd::Command;
use std::path::Path;

fn deckhand(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("deckhand").unwrap();
    cmd.arg("--config")
        .arg(dir.join("absent.toml"))
        .arg("--recordings-dir")
        .arg(dir.join("recordings"));
    cmd
}

fn stdout(cmd: &mut Command) -> String {
    let out = cmd.output().unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout).unwrap()
}

#[test]
fn classify_ignores_path_and_flags() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(deckhand(dir.path()).args(["effects", "classify", "/usr/local/bin/codex", "--flag"]));
    assert!(out.starts_with("codex"), "got: {out}");
}

#[test]
fn classify_unknown_command() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(deckhand(dir.path()).args(["effects", "classify", "not-a-real-agent"]));
    assert!(out.contains("no match"), "got: {out}");
}

#[test]
fn effects_list_includes_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(deckhand(dir.path()).args(["effects", "list"]));
    assert!(out.contains("claude"));
    assert!(out.contains("aider"));
}

#[test]
fn configured_effects_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[[effects]]\nid = \"qwen\"\nmatch_commands = [\"qwen\"]\n").unwrap();
    let mut cmd = Command::cargo_bin("deckhand").unwrap();
    cmd.arg("--config").arg(&config).args(["effects", "classify", "qwen"]);
    assert!(stdout(&mut cmd).starts_with("qwen"));
}

#[test]
fn empty_recordings_dir() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(deckhand(dir.path()).args(["recordings", "list"]));
    assert!(out.contains("no recordings"));
}

#[test]
fn show_and_delete_recording() {
    let dir = tempfile::tempdir().unwrap();
    let recs = dir.path().join("recordings");
    std::fs::create_dir_all(&recs).unwrap();
    std::fs::write(
        recs.join("demo.jsonl"),
        concat!(
            r#"{"type":"meta","schemaVersion":1,"createdAt":5,"projectId":"p","sessionPersistId":"x","cwd":null}"#,
            "\n",
            r#"{"type":"input","t":0,"data":"echo hi\r"}"#,
            "\n",
        ),
    )
    .unwrap();

    let listed = stdout(deckhand(dir.path()).args(["recordings", "list"]));
    assert!(listed.contains("demo"));

    let shown = stdout(deckhand(dir.path()).args(["recordings", "show", "demo"]));
    assert!(shown.contains("events:    1"));
    assert!(shown.contains("echo hi"));

    stdout(deckhand(dir.path()).args(["recordings", "delete", "demo"]));
    assert!(!recs.join("demo.jsonl").exists());
}

#[test]
fn missing_recording_fails() {
    let dir = tempfile::tempdir().unwrap();
    deckhand(dir.path())
        .args(["recordings", "show", "ghost"])
        .assert()
        .failure();
}

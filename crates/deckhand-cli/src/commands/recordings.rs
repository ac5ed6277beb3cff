//! `deckhand recordings`: list, show and delete stored recordings.

use anyhow::{Context, Result};
use deckhand_bridge::{BridgeConfig, FileRecordingStore, RecordingStore, ReplayState};

fn store(config: &BridgeConfig) -> FileRecordingStore {
    FileRecordingStore::new(&config.recordings_dir)
}

pub async fn run_list(config: &BridgeConfig) -> Result<()> {
    let list = store(config)
        .list()
        .await
        .context("failed to list recordings")?;
    if list.is_empty() {
        println!("no recordings in {}", config.recordings_dir.display());
        return Ok(());
    }

    println!("{:<28} {:<20} {:<12} CWD", "ID", "NAME", "EFFECT");
    for summary in list {
        let meta = summary.meta.as_ref();
        println!(
            "{:<28} {:<20} {:<12} {}",
            summary.recording_id,
            meta.and_then(|m| m.name.as_deref()).unwrap_or("-"),
            meta.and_then(|m| m.effect_id.as_deref()).unwrap_or("-"),
            meta.and_then(|m| m.cwd.as_deref()).unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn run_show(config: &BridgeConfig, recording_id: &str) -> Result<()> {
    let recording = store(config)
        .load(recording_id)
        .await
        .with_context(|| format!("failed to load recording '{recording_id}'"))?;

    println!("recording: {}", recording.recording_id);
    if let Some(meta) = &recording.meta {
        println!("created:   {}", meta.created_at);
        if let Some(name) = &meta.name {
            println!("name:      {name}");
        }
        println!("project:   {}", meta.project_id);
        println!("session:   {}", meta.session_persist_id);
        println!("cwd:       {}", meta.cwd.as_deref().unwrap_or("-"));
        println!("effect:    {}", meta.effect_id.as_deref().unwrap_or("-"));
        if let Some(cmd) = &meta.bootstrap_command {
            println!("command:   {cmd}");
        }
    }
    println!("events:    {}", recording.events.len());

    let replay = ReplayState::open(recording);
    println!("\nflow:");
    for group in replay.groups() {
        println!("  +{:>7}ms  {}", group.t, group.preview);
    }
    println!("\nsteps:");
    for (n, step) in replay.steps().iter().enumerate() {
        println!("  {:>3}  {:?}", n + 1, step);
    }
    Ok(())
}

pub async fn run_delete(config: &BridgeConfig, recording_id: &str) -> Result<()> {
    store(config)
        .delete(recording_id)
        .await
        .with_context(|| format!("failed to delete recording '{recording_id}'"))?;
    println!("deleted {recording_id}");
    Ok(())
}

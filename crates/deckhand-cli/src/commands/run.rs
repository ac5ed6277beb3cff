//! `deckhand run`: run a shell or command in this terminal.
//!
//! Opens a session through the bridge (optionally inside a persistent
//! multiplexer session), optionally records the keystrokes sent to it, and
//! relays the local terminal until the session exits or Ctrl+] is pressed.
//! Ctrl+] detaches from a persistent session and closes any other.

use anyhow::{Context, Result};
use deckhand_bridge::{BridgeConfig, CreateRequest, StartRecording};
use tracing::info;

use super::session::{self, Deck, Ending};
use crate::terminal as term;
use crate::RunArgs;

pub async fn run(config: &BridgeConfig, args: RunArgs) -> Result<()> {
    let (cols, rows) = term::get_terminal_size();
    let persistent = args.persistent || args.persist_id.is_some();
    let command = (!args.command.is_empty()).then(|| args.command.join(" "));

    let mut deck = Deck::new(config);
    let session_id = deck
        .bridge
        .open_session(CreateRequest {
            name: args.name,
            command,
            cwd: args.cwd,
            persistent,
            persist_id: args.persist_id,
            cols,
            rows,
            ..CreateRequest::default()
        })
        .await
        .context("failed to open session")?;

    let persist_id = deck
        .bridge
        .session(&session_id)
        .map(|s| s.persist_id.clone())
        .unwrap_or_default();
    if persistent {
        eprintln!("deckhand: persistent session {persist_id} (Ctrl+] to detach)");
    } else {
        eprintln!("deckhand: Ctrl+] to close the session");
    }

    if let Some(name) = args.record {
        let recording_id = deck
            .bridge
            .start_recording(
                &session_id,
                StartRecording {
                    recording_id: None,
                    name: Some(name),
                    project_id: args.project,
                },
            )
            .await
            .context("failed to start recording")?;
        info!(recording_id = %recording_id, "recording");
    }

    let ending = session::interact(&mut deck, &session_id, None).await?;
    let recording = session::finish(&mut deck, &session_id, ending).await?;

    match ending {
        Ending::Exited(code) => {
            eprintln!("\r\ndeckhand: session exited (code {})", fmt_code(code))
        }
        Ending::Detached if persistent => eprintln!(
            "\r\ndeckhand: detached; reattach with `deckhand run --persist-id {persist_id}`"
        ),
        Ending::Detached => eprintln!("\r\ndeckhand: session closed"),
    }
    if let Some(id) = recording {
        println!("recording saved: {id}");
    }
    Ok(())
}

fn fmt_code(code: Option<u32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
}

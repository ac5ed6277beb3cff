//! `deckhand replay <ID>`: replay a recording into a new session.
//!
//! Steps are sent on Ctrl+N, or on a timer with `--auto`; every other key
//! goes to the session as usual.

use anyhow::{Context, Result};
use deckhand_bridge::BridgeConfig;
use std::time::Duration;

use super::session::{self, Deck, ReplayControl};

pub async fn run(config: &BridgeConfig, recording_id: &str, auto: Option<Duration>) -> Result<()> {
    let mut deck = Deck::new(config);
    let mut state = deck
        .bridge
        .open_replay(recording_id)
        .await
        .with_context(|| format!("failed to open recording '{recording_id}'"))?;
    if state.steps().is_empty() {
        anyhow::bail!("recording '{recording_id}' has no steps");
    }

    let session_id = deck
        .bridge
        .ensure_replay_target(&mut state)
        .await
        .context("failed to open replay session")?;

    match auto {
        Some(interval) => eprintln!(
            "deckhand: replaying {} steps every {}ms (Ctrl+] to stop)",
            state.steps().len(),
            interval.as_millis()
        ),
        None => eprintln!(
            "deckhand: {} steps; Ctrl+N sends the next one, Ctrl+] stops",
            state.steps().len()
        ),
    }

    let ending = session::interact(
        &mut deck,
        &session_id,
        Some(ReplayControl {
            state: &mut state,
            auto,
        }),
    )
    .await?;
    session::finish(&mut deck, &session_id, ending).await?;
    eprintln!(
        "\r\ndeckhand: replay stopped after {} of {} steps",
        state.index(),
        state.steps().len()
    );
    Ok(())
}

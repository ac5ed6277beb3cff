//! `deckhand persistent`: list and kill multiplexer-backed sessions.

use anyhow::{Context, Result};
use deckhand_bridge::BridgeConfig;

use super::session::Deck;

pub async fn run_list(config: &BridgeConfig) -> Result<()> {
    let mut deck = Deck::new(config);
    let ids = deck
        .bridge
        .list_persistent()
        .await
        .context("failed to list persistent sessions")?;
    if ids.is_empty() {
        println!("no persistent sessions");
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

pub async fn run_kill(config: &BridgeConfig, persist_id: &str) -> Result<()> {
    let mut deck = Deck::new(config);
    deck.bridge
        .kill_persistent(persist_id)
        .await
        .with_context(|| format!("failed to kill persistent session '{persist_id}'"))?;
    println!("killed {persist_id}");
    Ok(())
}

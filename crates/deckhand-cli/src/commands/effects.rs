//! `deckhand effects`: inspect the agent catalog.

use anyhow::Result;
use deckhand_bridge::BridgeConfig;
use deckhand_core::effect::normalize_command;

pub fn run_list(config: &BridgeConfig) -> Result<()> {
    println!("{:<14} {:<16} {:>8}  MATCHES", "ID", "LABEL", "IDLE");
    for effect in config.catalog().effects() {
        println!(
            "{:<14} {:<16} {:>6}ms  {}",
            effect.id,
            effect.label,
            effect.idle_after().as_millis(),
            effect.match_commands.join(", ")
        );
    }
    Ok(())
}

pub fn run_classify(config: &BridgeConfig, command_line: &str) -> Result<()> {
    let catalog = config.catalog();
    match catalog.classify(Some(command_line), None) {
        Some(effect) => println!("{} ({})", effect.id, effect.label),
        None => println!(
            "no match for {}",
            normalize_command(command_line).unwrap_or_default()
        ),
    }
    Ok(())
}

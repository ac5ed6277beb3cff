//! deckhand: drive, record and replay terminal sessions.
//!
//! Runs shells and coding agents in the local terminal through the session
//! bridge, optionally inside a persistent multiplexer session, records the
//! keystrokes sent to them and replays recordings step by step.

mod commands;
mod surface;
mod terminal;

use clap::{Args, Parser, Subcommand};
use deckhand_bridge::{BridgeConfig, ConfigOverrides};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// deckhand: session bridge for shells and coding agents
#[derive(Parser)]
#[command(name = "deckhand", version, about = "Drive, record and replay terminal sessions")]
struct Cli {
    /// Config file path (default: ~/.deckhand/config.toml)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long = "log-level", global = true, default_value = "warn")]
    log_level: String,

    /// Directory holding recordings
    #[arg(long = "recordings-dir", global = true)]
    recordings_dir: Option<PathBuf>,

    /// Multiplexer executable for persistent sessions
    #[arg(long = "multiplexer", global = true)]
    multiplexer: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a shell or command in this terminal
    Run(RunArgs),

    /// Inspect stored recordings
    Recordings {
        #[command(subcommand)]
        command: RecordingsCommand,
    },

    /// Replay a recording into a new session
    Replay {
        /// Recording id
        id: String,
        /// Send every step without waiting for Ctrl+N
        #[arg(long)]
        auto: bool,
        /// Pause between steps in --auto mode
        #[arg(long = "interval-ms", default_value_t = 1000)]
        interval_ms: u64,
    },

    /// Inspect the agent catalog
    Effects {
        #[command(subcommand)]
        command: EffectsCommand,
    },

    /// Manage persistent multiplexer sessions
    Persistent {
        #[command(subcommand)]
        command: PersistentCommand,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Session name
    #[arg(long)]
    name: Option<String>,

    /// Working directory
    #[arg(long)]
    cwd: Option<String>,

    /// Back the session with a multiplexer session that survives detach
    #[arg(long)]
    persistent: bool,

    /// Persist id to create or reattach (implies --persistent)
    #[arg(long = "persist-id")]
    persist_id: Option<String>,

    /// Record keystrokes under this name
    #[arg(long)]
    record: Option<String>,

    /// Project the recording belongs to
    #[arg(long, default_value = "default")]
    project: String,

    /// Command to run instead of the login shell
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Subcommand)]
enum RecordingsCommand {
    /// List recordings, newest first
    List,
    /// Show a recording's metadata, flow and steps
    Show {
        /// Recording id
        id: String,
    },
    /// Delete a recording
    Delete {
        /// Recording id
        id: String,
    },
}

#[derive(Subcommand)]
enum EffectsCommand {
    /// List known agents
    List,
    /// Classify a command line
    Classify {
        /// Command line to classify
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PersistentCommand {
    /// List persistent sessions
    List,
    /// Kill a persistent session
    Kill {
        /// Persist id
        persist_id: String,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "deckhand={level},deckhand_cli={level},deckhand_bridge={level},deckhand_core={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match BridgeConfig::load(
        cli.config.as_deref(),
        ConfigOverrides {
            recordings_dir: cli.recordings_dir.clone(),
            multiplexer: cli.multiplexer.clone(),
        },
    ) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            eprintln!("deckhand: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run(args) => commands::run::run(&config, args).await,
        Command::Recordings { command } => match command {
            RecordingsCommand::List => commands::recordings::run_list(&config).await,
            RecordingsCommand::Show { id } => commands::recordings::run_show(&config, &id).await,
            RecordingsCommand::Delete { id } => {
                commands::recordings::run_delete(&config, &id).await
            }
        },
        Command::Replay {
            id,
            auto,
            interval_ms,
        } => {
            let auto = auto.then(|| std::time::Duration::from_millis(interval_ms));
            commands::replay::run(&config, &id, auto).await
        }
        Command::Effects { command } => match command {
            EffectsCommand::List => commands::effects::run_list(&config),
            EffectsCommand::Classify { command } => {
                commands::effects::run_classify(&config, &command.join(" "))
            }
        },
        Command::Persistent { command } => match command {
            PersistentCommand::List => commands::persistent::run_list(&config).await,
            PersistentCommand::Kill { persist_id } => {
                commands::persistent::run_kill(&config, &persist_id).await
            }
        },
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("deckhand: {e:#}");
        std::process::exit(1);
    }
}

//! CLI subcommand implementations.

pub mod effects;
pub mod persistent;
pub mod recordings;
pub mod replay;
pub mod run;
pub mod session;

//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "voicelink", version, about = "Voice-assistant device runtime")]
pub struct Cli {
    /// Path to the configuration file (default: ~/.config/voicelink/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the device loop on the headless development board
    Run,
    /// Perform one firmware version check and print the result
    CheckUpdate,
    /// Print the resolved configuration
    Config,
}

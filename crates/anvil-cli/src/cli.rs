use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "anvil", version, about = "Build and install developer tools from source")]
pub struct Cli {
    /// JSON config file (defaults to ./anvil.json when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the simulated installer instead of running recipes
    #[arg(long, global = true, default_value_t = false)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install one or more tools concurrently
    Install {
        #[arg(required = true)]
        tools: Vec<String>,
        /// Build flavour recorded alongside each tool
        #[arg(long, default_value = "release")]
        build_type: String,
        /// Reinstall even when the manifest already lists the tool
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Check that this machine can build tools
    Doctor,

    /// Show installed tools
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

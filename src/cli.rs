// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slipway")]
#[command(about = "Deploy a service, verify it is healthy, revert if it is not")]
#[command(version)]
pub struct Cli {
    /// Enable debug-level diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a version to an environment and verify it
    Deploy {
        /// Target environment (staging or production)
        environment: String,

        /// Version tag shared by every built artifact
        version: String,
    },

    /// Revert the most recent recorded attempt for an environment
    Rollback {
        /// Target environment (staging or production)
        environment: String,
    },

    /// Run pre-flight validation only, mutating nothing
    Validate {
        /// Target environment (staging or production)
        environment: String,
    },
}

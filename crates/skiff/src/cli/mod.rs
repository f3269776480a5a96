//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use skiff_common::SkiffPaths;

mod bridge;
mod plugin;

pub use bridge::{BridgeArgs, BridgeCommand};
pub use plugin::{PluginArgs, PluginCommand};

/// Skiff - pluggable container network drivers
#[derive(Parser)]
#[command(name = "skiff")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration directory
    #[arg(long, global = true, env = "SKIFF_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Program or remove the iptables rules of a bridge network
    Bridge {
        /// The bridge operation.
        #[command(subcommand)]
        command: BridgeCommand,
    },

    /// Call a remote network plugin
    Plugin(PluginArgs),
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn execute(self) -> Result<()> {
        let paths = self
            .config_dir
            .map_or_else(SkiffPaths::new, SkiffPaths::with_config_dir);

        match self.command {
            Commands::Bridge { command } => bridge::execute(&paths, command),
            Commands::Plugin(args) => plugin::execute(&paths, args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn dry_run_requires_address() {
        let result = Cli::try_parse_from(["skiff", "bridge", "setup", "--dry-run"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "skiff",
            "bridge",
            "setup",
            "--dry-run",
            "--address",
            "172.17.0.1/16",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Bridge { .. }));
    }

    #[test]
    fn plugin_needs_a_target() {
        let result = Cli::try_parse_from(["skiff", "plugin", "create-network", "--network", "n1"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "skiff",
            "plugin",
            "--url",
            "http://127.0.0.1:9000",
            "create-network",
            "--network",
            "n1",
            "--opt",
            "com.example.mtu=1450",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Plugin(_)));
    }
}

//! CLI subcommand definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Run the HTTP server.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `server.bind`)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Also poll upstream in the background every SECS seconds
    #[arg(long, value_name = "SECS")]
    pub poll_every: Option<u64>,
}

/// Run a single poll cycle.
#[derive(Debug, Args)]
pub struct PollCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// List stored contacts.
#[derive(Debug, Args)]
pub struct ContactsCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_command_debug() {
        let cmd = ServeCommand {
            bind: Some("127.0.0.1:8080".to_string()),
            poll_every: Some(30),
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("127.0.0.1:8080"));
        assert!(debug_str.contains("poll_every"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        assert!(format!("{cmd:?}").contains("Show"));
    }
}

//! Command-line interface for the `airspace` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, ContactsCommand, PollCommand, ServeCommand};

use crate::logging::Verbosity;

/// airspace - Watch the sky above a fixed point
///
/// Polls the OpenSky Network for aircraft near the configured center and
/// serves a short list of recent contacts to display clients.
#[derive(Debug, Parser)]
#[command(name = "airspace")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the display feed over HTTP
    Serve(ServeCommand),

    /// Poll upstream once and print the display list
    Poll(PollCommand),

    /// List stored contacts
    Contacts(ContactsCommand),

    /// Apply the retention policy to the contact store
    Prune,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
        assert_eq!(Cli::command().get_name(), "airspace");
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["airspace", "prune"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["airspace", "-q", "-v", "prune"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["airspace", "-v", "prune"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["airspace", "-vv", "prune"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_serve() {
        let cli = parse(&["airspace", "serve", "--bind", "127.0.0.1:8080", "--poll-every", "30"]);
        match cli.command {
            Command::Serve(cmd) => {
                assert_eq!(cmd.bind.as_deref(), Some("127.0.0.1:8080"));
                assert_eq!(cmd.poll_every, Some(30));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = parse(&["airspace", "serve"]);
        assert!(matches!(
            cli.command,
            Command::Serve(ServeCommand {
                bind: None,
                poll_every: None
            })
        ));
    }

    #[test]
    fn test_parse_poll_and_contacts() {
        assert!(matches!(
            parse(&["airspace", "poll", "--json"]).command,
            Command::Poll(PollCommand { json: true })
        ));
        assert!(matches!(
            parse(&["airspace", "contacts"]).command,
            Command::Contacts(ContactsCommand { json: false })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["airspace", "-c", "/etc/airspace.toml", "prune"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/airspace.toml")));
        assert!(matches!(cli.command, Command::Prune));
    }

    #[test]
    fn test_parse_config_subcommands() {
        assert!(matches!(
            parse(&["airspace", "config", "path"]).command,
            Command::Config(ConfigCommand::Path)
        ));
        let cli = parse(&["airspace", "config", "validate", "--file", "x.toml"]);
        match cli.command {
            Command::Config(ConfigCommand::Validate { file }) => {
                assert_eq!(file, Some(PathBuf::from("x.toml")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_fails() {
        assert!(Cli::try_parse_from(["airspace", "daemon"]).is_err());
    }
}

//! CLI Module
//!
//! Command-line interface for driving a DAW session and running snapshot
//! exports.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{Config, SurfaceKind};
use crate::surface::TransportAction;

/// PT-STEM - batch snapshot bounces from a DAW session
#[derive(Parser, Debug)]
#[command(name = "ptstem")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the simulated session regardless of configuration
    #[arg(long, global = true)]
    pub simulated: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if self.simulated {
            config.surface = SurfaceKind::Simulated;
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the open session
    #[command(name = "session")]
    Session,

    /// List tracks with their mute/solo state
    #[command(name = "tracks")]
    Tracks,

    /// Drive the transport
    #[command(name = "transport")]
    Transport {
        #[arg(value_enum)]
        action: TransportArg,
    },

    /// Apply a snapshot file to the session
    #[command(name = "apply")]
    Apply {
        /// Snapshot JSON file
        path: PathBuf,
    },

    /// Save the session's current mute/solo state as a snapshot
    #[command(name = "capture")]
    Capture {
        /// Snapshot name
        name: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a batch export and follow its progress (Ctrl-C cancels)
    #[command(name = "export")]
    Export {
        /// Export request JSON file
        path: PathBuf,

        /// Status poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },

    /// Bounce the current mix without snapshots
    #[command(name = "direct")]
    Direct {
        /// Export settings JSON file
        path: PathBuf,
    },
}

/// Transport action as typed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Play,
    Stop,
    Record,
}

impl From<TransportArg> for TransportAction {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Play => TransportAction::Play,
            TransportArg::Stop => TransportAction::Stop,
            TransportArg::Record => TransportAction::Record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export() {
        let cli = Cli::try_parse_from(["ptstem", "--simulated", "export", "req.json", "--poll-ms", "50"])
            .unwrap();
        assert!(cli.simulated);
        match cli.command {
            Commands::Export { path, poll_ms } => {
                assert_eq!(path, PathBuf::from("req.json"));
                assert_eq!(poll_ms, 50);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from(["ptstem", "-v", "--simulated", "transport", "record"]).unwrap();
        let mut config = Config {
            surface: SurfaceKind::Bridge,
            ..Config::default()
        };
        cli.apply_overrides(&mut config);
        assert_eq!(config.surface, SurfaceKind::Simulated);
        assert_eq!(config.log_level, "debug");

        match cli.command {
            Commands::Transport { action } => {
                assert_eq!(TransportAction::from(action), TransportAction::Record)
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

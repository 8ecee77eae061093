//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Enqueue command arguments.
///
/// The payload comes from the positional argument, from `--file`, or from
/// stdin when neither is given.
#[derive(Debug, Args)]
pub struct EnqueueCommand {
    /// Validation payload as a JSON document
    #[arg(conflicts_with = "file")]
    pub payload: Option<String>,

    /// Read the payload from a file
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Show dead-lettered entries instead of pending ones
    #[arg(short, long)]
    pub dead: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Output the sync report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Clear command arguments.
#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Import command arguments.
#[derive(Debug, Args)]
pub struct ImportCommand {
    /// File holding the legacy JSON array of pending validations
    pub file: PathBuf,
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
    fn test_enqueue_command_debug() {
        let cmd = EnqueueCommand {
            payload: Some(r#"{"id_bande_sortie": 1}"#.to_string()),
            file: None,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("payload"));
        assert!(debug_str.contains("id_bande_sortie"));
    }

    #[test]
    fn test_list_command_debug() {
        let cmd = ListCommand {
            dead: true,
            json: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("dead: true"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_clear_command_debug() {
        let cmd = ClearCommand { yes: true };
        assert!(format!("{cmd:?}").contains("yes"));
    }
}

//! Command-line interface for charroi.
//!
//! This module provides the CLI structure and command handlers for the
//! `charroi-sync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ClearCommand, ConfigCommand, EnqueueCommand, ImportCommand, ListCommand, StatusCommand,
    SyncCommand,
};

use crate::logging::Verbosity;

/// charroi-sync - Keep fleet validations safe while offline
///
/// Queues transport-voucher validations that could not reach the charroi
/// server and submits them, in order, once the connection is back.
#[derive(Debug, Parser)]
#[command(name = "charroi-sync")]
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
    /// Queue a validation for later submission
    Enqueue(EnqueueCommand),

    /// Submit pending validations now
    Sync(SyncCommand),

    /// List queued validations
    List(ListCommand),

    /// Show queue status
    Status(StatusCommand),

    /// Watch connectivity and sync on every reconnect
    Watch,

    /// Drop one entry without submitting it
    Drop {
        /// Entry id, as shown by `list`
        id: i64,
    },

    /// Return a dead-lettered entry to the queue
    Requeue {
        /// Entry id, as shown by `list --dead`
        id: i64,
    },

    /// Drop every queued entry
    Clear(ClearCommand),

    /// Import a legacy single-blob queue
    Import(ImportCommand),

    /// View or check configuration
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

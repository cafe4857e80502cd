//! CLI command definitions for flux.
//!
//! This module defines the CLI structure using clap's derive macros.
//! Output formatting for each subcommand lives in its own submodule.

pub mod tasks;
pub mod webhook;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasks::ProjectArgs;
use webhook::{DeliveriesArgs, WebhookCommand};

/// Flux task tracker and webhook delivery service
#[derive(Parser, Debug)]
#[command(name = "flux", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API (default if no subcommand given)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List tasks that are ready to work on, most urgent first
    Ready(ProjectArgs),

    /// List blocked tasks with the tasks blocking them
    Blocked(ProjectArgs),

    /// Manage webhooks
    #[command(subcommand)]
    Webhook(WebhookCommand),

    /// Show recent webhook deliveries
    Deliveries(DeliveriesArgs),
}

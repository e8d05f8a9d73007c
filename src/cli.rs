//! Command-line interface for sshfs-sentry
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::manifest::{DEFAULT_SETTINGS_PATH, SchedulerBackend};
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// sshfs-sentry - keep sshfs mounts alive
#[derive(Parser)]
#[command(name = "sshfs-sentry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Override the config directory from the settings file
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Server fields that may be given as flags instead of prompted for
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// SSH private key used to authenticate
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,

    /// Remote login in user@host form
    #[arg(long)]
    pub user_host: Option<String>,

    /// Directory on the remote host
    #[arg(long)]
    pub remote_path: Option<String>,

    /// Local mount point (default: <mount_root>/<name>)
    #[arg(long)]
    pub mount_point: Option<PathBuf>,

    /// Minutes between checks
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub interval: Option<u32>,

    /// Periodic trigger backend (default from settings)
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerBackend>,

    /// Write units without enabling them
    #[arg(long)]
    pub no_activate: bool,

    /// Fail instead of prompting for missing fields
    #[arg(long)]
    pub non_interactive: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Register a server and install its mount check
    Add {
        /// Server name (letters, digits, '-' and '_')
        name: Option<String>,

        #[command(flatten)]
        fields: ServerArgs,
    },

    /// Change a registered server
    Edit {
        /// Server name
        name: String,

        #[command(flatten)]
        fields: ServerArgs,
    },

    /// List registered servers
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show mount state and last check result
    Status {
        /// Only this server
        name: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a server and its mount check
    Remove {
        /// Server name
        name: String,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Remove every server and all files installed by sshfs-sentry
    Uninstall {
        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Check for a newer release
    Update {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check one mount and repair it if needed
    #[command(group(
        ArgGroup::new("target")
            .required(true)
            .args(["name", "config_file"])
    ))]
    Check {
        /// Registered server name
        name: Option<String>,

        /// Server config file
        #[arg(long, requires = "log_file", conflicts_with = "name")]
        config_file: Option<PathBuf>,

        /// Event log file
        #[arg(long, requires = "config_file")]
        log_file: Option<PathBuf>,

        /// Directory for the overlap lock
        #[arg(long)]
        lock_dir: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "sshfs-sentry", &mut std::io::stdout());
    }
}

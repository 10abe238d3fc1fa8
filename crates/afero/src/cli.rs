//! Clap derive structures for the `afero` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

use afero_api::Vendor;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// afero -- watch and control Afero cloud devices
#[derive(Debug, Parser)]
#[command(
    name = "afero",
    version,
    about = "Watch and control Hubspace and Myko devices from the command line",
    long_about = "Polls the Afero cloud for device state, streams changes as they\n\
        happen, and sends commands with optimistic updates.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "AFERO_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Cloud vendor (overrides profile)
    #[arg(long, env = "AFERO_VENDOR", global = true)]
    pub vendor: Option<Vendor>,

    /// OpenID refresh token (overrides profile credentials)
    #[arg(long, env = "AFERO_REFRESH_TOKEN", global = true, hide_env = true)]
    pub refresh_token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "plain", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "AFERO_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    Plain,
    /// One JSON document per record
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices and their current state
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Stream device changes until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Set a device function to a value
    Set(SetArgs),
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: Option<DevicesCommand>,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List every device (default)
    #[command(alias = "ls")]
    List,

    /// Show one device with all of its functions
    Get {
        /// Device id or friendly name
        device: String,
    },
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show events for this device (id or friendly name)
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Hide device added/removed and status events
    #[arg(long)]
    pub changes_only: bool,

    /// Seconds between polls (overrides profile)
    #[arg(long)]
    pub interval: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Device id or friendly name
    pub device: String,

    /// Function class, e.g. `power` or `brightness`
    pub function: String,

    /// New value, parsed according to the function's domain
    pub value: String,

    /// Function instance for multi-resource devices
    #[arg(long, short = 'r', default_value = "main")]
    pub resource: String,
}

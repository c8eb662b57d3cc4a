//! Clap derive structures for the `ridelink` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};
use ridelink_core::EngagementKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ridelink -- follow rides and run driver searches from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "ridelink",
    version,
    about = "Follow rides and coordinate driver searches from the command line",
    long_about = "A client for the ridelink real-time backend.\n\n\
        Connects to the ride socket for live status, chat and emergency\n\
        events, and uses the query API for driver search and status lookups.",
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
    /// Backend profile to use
    #[arg(long, short = 'p', env = "RIDELINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Socket endpoint (overrides profile)
    #[arg(long, env = "RIDELINK_SERVER", global = true)]
    pub server: Option<String>,

    /// Query API base URL (overrides profile)
    #[arg(long, env = "RIDELINK_API", global = true)]
    pub api: Option<String>,

    /// Access token
    #[arg(long, env = "RIDELINK_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// User id presented to the socket
    #[arg(long, env = "RIDELINK_RIDER", global = true)]
    pub rider: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "RIDELINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Query API timeout in seconds (overrides profile)
    #[arg(long, env = "RIDELINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON, one event per line
    JsonCompact,
    /// YAML
    Yaml,
    /// Bare values, one per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow a ride live: status, chat and emergency events
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Search for a driver with an expanding radius
    #[command(alias = "s")]
    Search(SearchArgs),

    /// Show the backend's current status for a ride
    Status(StatusArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Ride commands ────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Ride (engagement) id
    pub ride_id: String,

    /// Engagement kind
    #[arg(long, default_value = "ride")]
    pub kind: EngagementKind,

    /// Send a chat message once the room is joined
    #[arg(long, value_name = "MESSAGE")]
    pub say: Option<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Ride (engagement) id
    pub ride_id: String,

    /// Pickup latitude
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Pickup longitude
    #[arg(long, allow_hyphen_values = true)]
    pub lng: f64,

    /// Poll the query API only, without opening the socket
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Ride (engagement) id
    pub ride_id: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or extend the config file with guided setup
    Init,

    /// Print the resolved configuration (tokens redacted)
    Show,

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

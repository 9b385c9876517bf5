//! Clap derive structures for the `devwatch` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// devwatch -- live device telemetry by phone number
#[derive(Debug, Parser)]
#[command(
    name = "devwatch",
    version,
    about = "Track live device telemetry by phone number",
    long_about = "Sends a push request to the device behind a phone number and follows\n\
        its answer: live over the STOMP update topic, with session status\n\
        polling as a fallback.",
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
    #[arg(long, short = 'p', env = "DEVWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Push backend URL (overrides profile)
    #[arg(long, short = 'b', env = "DEVWATCH_BACKEND", global = true)]
    pub backend: Option<String>,

    /// Update broker WebSocket URL (overrides profile)
    #[arg(long, short = 'w', env = "DEVWATCH_WEBSOCKET", global = true)]
    pub websocket: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DEVWATCH_OUTPUT",
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

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "DEVWATCH_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "DEVWATCH_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
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
    /// Push a telemetry request and follow the device's answer
    #[command(alias = "t")]
    Track(TrackArgs),

    /// Show a push session's backend status
    Status(StatusArgs),

    /// List device records known to the backend
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// End a push session on the backend
    End(EndArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Track ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TrackArgs {
    /// Phone number (MSISDN) of the device to track
    pub phone: String,

    /// Exit after the first device update
    #[arg(long)]
    pub once: bool,

    /// Leave the backend session open on exit
    #[arg(long)]
    pub keep_session: bool,

    /// Use the legacy direct search trigger (no session, no status polling)
    #[arg(long)]
    pub legacy: bool,

    /// Give up after waiting this long for the device (e.g. "90s", "5m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub wait: Option<Duration>,

    /// Status poll interval in seconds (overrides profile)
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

// ── Sessions & Devices ───────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Session id returned by `track`
    pub session_id: String,
}

#[derive(Debug, Args)]
pub struct EndArgs {
    /// Session id returned by `track`
    pub session_id: String,
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Show only the device registered to this phone number
    pub phone: Option<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile (interactive unless --backend is given)
    Init(ConfigInitArgs),

    /// Show the current configuration
    Show,

    /// Print the config file path
    Path,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct ConfigInitArgs {
    /// Profile name
    #[arg(long = "name", default_value = "default")]
    pub profile_name: String,

    /// Push backend URL; skips the interactive prompts
    #[arg(long = "url")]
    pub backend_url: Option<String>,

    /// Broker WebSocket URL (derived from the backend URL when omitted)
    #[arg(long = "ws-url")]
    pub websocket_url: Option<String>,

    /// Agent id sent with push requests
    #[arg(long)]
    pub agent_id: Option<String>,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

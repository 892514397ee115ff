//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Dispatch Engine - inbound message dispatch for endpoint activations
#[derive(Parser, Debug)]
#[command(
    name = "dispatch-engine",
    author,
    version,
    about = "Inbound message dispatch engine",
    long_about = "Delivers locked message batches to message endpoints and acknowledges them.\n\n\
                  Loads an activation configuration, selects the acknowledgment strategy \n\
                  and can simulate dispatch cycles against an in-memory broker."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        env = "DISPATCH_ENGINE_VERBOSE"
    )]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "DISPATCH_ENGINE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration file without dispatching
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),

    /// Run dispatch cycles against an in-memory broker
    Simulate(SimulateArgs),
}

impl Commands {
    /// Configuration file the command works on
    pub fn config_path(&self) -> &Path {
        match self {
            Commands::Validate(args) => &args.config,
            Commands::Info(args) => &args.config,
            Commands::Simulate(args) => &args.config,
        }
    }
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `simulate` command
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "dispatch.toml",
        env = "DISPATCH_ENGINE_CONFIG"
    )]
    pub config: PathBuf,

    /// Number of messages to lock
    #[arg(short, long, default_value = "100", env = "DISPATCH_ENGINE_MESSAGES")]
    pub messages: usize,

    /// Fail every n-th delivery (0 = never)
    #[arg(long, default_value = "0")]
    pub fail_every: u64,

    /// Raise a fatal signal when delivering this message
    #[arg(long)]
    pub fatal_at: Option<u64>,

    /// Reliability of the generated messages
    #[arg(long, value_enum, default_value = "reliable-persistent")]
    pub reliability: ReliabilityArg,

    /// Metrics server port, overrides the configuration
    #[arg(long, env = "DISPATCH_ENGINE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Message reliability
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ReliabilityArg {
    BestEffortNonPersistent,
    ExpressNonPersistent,
    ReliableNonPersistent,
    ReliablePersistent,
    AssuredPersistent,
}

impl From<ReliabilityArg> for contracts::Reliability {
    fn from(arg: ReliabilityArg) -> Self {
        match arg {
            ReliabilityArg::BestEffortNonPersistent => Self::BestEffortNonPersistent,
            ReliabilityArg::ExpressNonPersistent => Self::ExpressNonPersistent,
            ReliabilityArg::ReliableNonPersistent => Self::ReliableNonPersistent,
            ReliabilityArg::ReliablePersistent => Self::ReliablePersistent,
            ReliabilityArg::AssuredPersistent => Self::AssuredPersistent,
        }
    }
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(about, version)]
pub struct Cli {
    /// Enable verbose output. (Specify twice for more verbosity.)
    #[arg(global = true, short = 'v', long, action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,

    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Action,
}

impl Cli {
    /// Gets the configured log level based on the user-supplied verbosity level.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[derive(Subcommand)]
pub enum Action {
    /// Write line protocol points to the dataway.
    #[command(name = "upload")]
    Upload(UploadConfig),

    /// Replay everything held in the fail cache.
    #[command(name = "flush")]
    Flush(FlushConfig),

    /// Check the shape of a workspace token.
    #[command(name = "check-token")]
    CheckToken(CheckTokenConfig),
}

/// Dataway and fail cache settings shared by the commands that talk to the dataway.
#[derive(Args, Clone)]
pub struct DatawayArgs {
    /// Path to the dataway configuration file.
    ///
    /// Settings can also be given, or overridden, with `DK_`-prefixed environment variables.
    #[arg(short = 'c', long, default_value = "/usr/local/datakit/conf.d/dataway.yaml")]
    pub config_path: PathBuf,

    /// Directory of the fail cache.
    #[arg(long, default_value = "/usr/local/datakit/cache/dw-fail")]
    pub cache_dir: PathBuf,

    /// Maximum size of the fail cache.
    #[arg(long, default_value = "1GiB")]
    pub cache_capacity: ByteSize,
}

/// `upload` configuration.
#[derive(Args, Clone)]
pub struct UploadConfig {
    #[command(flatten)]
    pub dataway: DatawayArgs,

    /// Category of the points, by name (`logging`) or write path (`/v1/write/logging`).
    #[arg(short = 't', long, default_value = "logging")]
    pub category: String,

    /// File to read points from. Reads standard input when absent or `-`.
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Cache bodies of every category on failure, metrics and objects included.
    #[arg(long)]
    pub cache_all: bool,

    /// Send bodies uncompressed.
    #[arg(long)]
    pub no_gzip: bool,
}

/// `flush` configuration.
#[derive(Args, Clone)]
pub struct FlushConfig {
    #[command(flatten)]
    pub dataway: DatawayArgs,
}

/// `check-token` configuration.
#[derive(Args, Clone)]
pub struct CheckTokenConfig {
    /// Token to check, such as `tkn_0123456789abcdef0123456789abcdef`.
    pub token: String,
}

//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

/// Default first port of the first pipeline
pub const DEFAULT_START_PORT: u16 = 8765;

#[derive(Parser, Debug)]
#[command(name = "baas-fleet")]
#[command(author, version, about = "Launch and supervise a fleet of speaking meeting bots")]
pub struct Cli {
    /// Number of bot pipelines to launch
    #[arg(short = 'c', long, required_unless_present = "batch")]
    pub count: Option<usize>,

    /// First port to use; each pipeline takes two consecutive ports
    #[arg(short = 's', long, default_value_t = DEFAULT_START_PORT)]
    pub start_port: u16,

    /// Meeting the bots join (must start with https://); prompted for if omitted
    #[arg(long)]
    pub meeting_url: Option<String>,

    /// JSON file with one override object per pipeline
    #[arg(long)]
    pub batch: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Log filter implied by `-v`/`-q`; `RUST_LOG` takes precedence
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

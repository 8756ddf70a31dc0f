//! Command-line flags, ported from the teacher's `cronback/src/cli.rs`.

use clap::Parser;

#[derive(clap::ValueEnum, Clone)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Parser)]
#[command(version)]
pub struct CliOpts {
    /// Sets the custom configuration file, layered over the embedded
    /// defaults and `CORE__`-prefixed environment variables.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<String>,

    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Directory for the rolling daily transitions log, separate from the
    /// stdout stream.
    #[arg(long, default_value = "logs", value_name = "DIR")]
    pub log_dir: String,
}

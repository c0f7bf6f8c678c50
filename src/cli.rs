use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "spigot",
    version,
    about = "Bandwidth-throttled TCP file server"
)]
pub struct Cli {
    /// Path to configuration file (also settable via SPIGOT_CONFIG env var)
    #[arg(short, long, default_value = "config.toml", env = "SPIGOT_CONFIG")]
    pub config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the configuration file and print a summary
    CheckConfig,
    /// Generate a commented sample config file
    Init {
        /// Where to write the sample config
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Probe a listener with a plain TCP connect
    HealthCheck {
        /// host:port to probe
        #[arg(long, default_value = "127.0.0.1:7777")]
        addr: String,
        /// Connect timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
}

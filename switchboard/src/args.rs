use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "switchboard", about = "Universal LLM API transformation gateway")]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "SWITCHBOARD_CONFIG", default_value = "switchboard.toml")]
    pub config: PathBuf,

    /// Address to listen on; overrides the configuration file.
    #[arg(short, long)]
    pub listen_address: Option<SocketAddr>,

    /// Log level filter (error, warn, info, debug, trace).
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

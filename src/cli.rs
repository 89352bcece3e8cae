//! Command-line interface

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// TURN REST API service - ephemeral TURN/STUN credentials for bearer-token holders
#[derive(Parser, Debug)]
#[command(name = "turn-rest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (JSON)
    #[arg(short, long, env = "TURNREST_CONFIG_FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Public listen address (credentials and ping)
    #[arg(long, env = "TURNREST_PUBLIC_ADDRESS", default_value = "0.0.0.0:8080")]
    pub public_address: SocketAddr,

    /// Admin listen address (health and metrics); may equal the public address
    #[arg(long, env = "TURNREST_ADMIN_ADDRESS", default_value = "0.0.0.0:8081")]
    pub admin_address: SocketAddr,

    /// Seconds between config file scans
    #[arg(long, env = "TURNREST_SCAN_INTERVAL_SECS", default_value_t = 30)]
    pub scan_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TURNREST_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TURNREST_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the service (default)
    Serve,

    /// Load and validate the config, then print its trust sources
    Check,

    /// Print a credential for a user without authentication
    Issue {
        /// User fragment embedded in the username
        #[arg(long)]
        user: String,

        /// Lifetime in seconds (defaults to the configured ttl)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Print the identifier of a base64 SPKI public key
    KeyId {
        /// Base64 DER public key, as it appears in `jwtPublicKeys`
        key: String,
    },
}

//! TURN REST Library
//!
//! Issues short-lived TURN/STUN credentials ("REST API for TURN Server"
//! scheme) to callers presenting a bearer token that a live set of trust
//! sources vouches for.
//!
//! # Components
//!
//! - **Trust store**: JWKS endpoints and static RSA keys, hot-swapped on config reload
//! - **Token validator**: races a token across every trust source under a deadline
//! - **Validation cache**: skips re-verification of recently accepted tokens
//! - **Authenticator**: extraction, scope checks, cache, validator, user resolution
//! - **Credential issuer**: HMAC-SHA1 username/password derivation (`turn-credentials`)
//! - **Config reload**: file watcher plus periodic scan, fail-safe on bad files

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod config_reload;
pub mod error;
pub mod server;
pub mod service;
pub mod trust;

pub use error::{Error, Result};
pub use turn_credentials::{Credential, IceServer};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}

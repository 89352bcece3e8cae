//! TURN REST API service
//!
//! Issues ephemeral TURN/STUN credentials to holders of trusted bearer tokens.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use turn_rest::{
    cli::{Cli, Command},
    config::TrustConfig,
    config_reload::ConfigWatcher,
    server::{self, ServerConfig},
    service::{TurnRestService, issue_credential},
    setup_tracing,
    trust::{StaticKey, TrustStore},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match &cli.command {
        Some(Command::KeyId { key }) => run_key_id(key),
        Some(Command::Check) => with_config(&cli, run_check),
        Some(Command::Issue { user, ttl }) => {
            with_config(&cli, |_, config| run_issue(&config, user, ttl.unwrap_or(0)))
        }
        Some(Command::Serve) | None => match require_config_path(&cli) {
            Ok(path) => run_server(&cli, path).await,
            Err(code) => code,
        },
    }
}

fn require_config_path(cli: &Cli) -> Result<PathBuf, ExitCode> {
    cli.config_file.clone().ok_or_else(|| {
        eprintln!("No config file: pass --config-file or set TURNREST_CONFIG_FILE");
        ExitCode::FAILURE
    })
}

fn with_config(cli: &Cli, run: impl FnOnce(&Path, TrustConfig) -> ExitCode) -> ExitCode {
    let path = match require_config_path(cli) {
        Ok(p) => p,
        Err(code) => return code,
    };
    match TrustConfig::load(&path) {
        Ok(config) => run(&path, config),
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}

/// Print the static key identifier
fn run_key_id(key: &str) -> ExitCode {
    match StaticKey::from_base64(key) {
        Ok(key) => {
            println!("{}", key.id());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Validate the config and list its trust sources
fn run_check(path: &Path, config: TrustConfig) -> ExitCode {
    let store = TrustStore::new(
        config.engine.jwks_fetch_timeout(),
        config.engine.jwks_cache_ttl(),
    );
    let outcome = store.reconcile(
        config.jwk_urls.iter().map(String::as_str),
        config.jwt_public_keys.iter().map(String::as_str),
    );

    println!("{}: {config}", path.display());
    for url in store.jwk_provider_urls() {
        println!("  jwk provider  {url}");
    }
    for id in store.static_key_ids() {
        println!("  static key    {id}");
    }
    for e in &outcome.errors {
        println!("  invalid       {e}");
    }

    if outcome.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print a credential as the service would return it
fn run_issue(config: &TrustConfig, user: &str, ttl: u64) -> ExitCode {
    let credential = match issue_credential(config, user, ttl) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&credential) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize credential: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the service
async fn run_server(cli: &Cli, config_path: PathBuf) -> ExitCode {
    let config = match TrustConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %config_path.display(), "Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(path = %config_path.display(), "Loaded configuration: {config}");

    let service = match TurnRestService::new(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to start service: {e}");
            return ExitCode::FAILURE;
        }
    };
    let sweeper = service.start();
    let _watcher = ConfigWatcher::start(
        config_path,
        Arc::clone(service.reconciler()),
        Duration::from_secs(cli.scan_interval_secs.max(1)),
        service.subscribe_shutdown(),
    );

    let metrics = server::install_metrics_recorder();
    let result = server::run(
        Arc::clone(&service),
        ServerConfig {
            public_addr: cli.public_address,
            admin_addr: cli.admin_address,
        },
        metrics,
    )
    .await;

    service.stop();
    let _ = sweeper.await;

    match result {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}

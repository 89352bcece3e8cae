//! Config hot-reload with trust store reconciliation.
//!
//! The watcher re-reads the config file whenever its modification marker
//! (mtime and length) changes, detected either by a `notify` event or by a
//! periodic scan (every 30 s by default). A successful load is diffed against
//! the running config, reconciled into the [`TrustStore`] (additions before
//! removals) and then swapped into [`LiveConfig`].
//!
//! A file that fails to load or validate changes nothing: the previous config
//! and trust sources stay authoritative.
//!
//! # Limitations
//!
//! `engine` tunables (timeouts, cache windows) are read once at start-up.
//! A reload that changes them logs a warning; restart to apply.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::Result;
use crate::auth::AuthPolicy;
use crate::config::TrustConfig;
use crate::trust::{ReconcileOutcome, SetDiff, TrustStore, diff_sets, key_id_for_base64};

/// Default periodic scan interval (30 seconds)
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

const DEBOUNCE: Duration = Duration::from_millis(500);

// ============================================================================
// Active config
// ============================================================================

/// CORS and caching headers attached to credential responses.
///
/// Rebuilt from scratch on every reload and never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTemplate {
    /// `Access-Control-Allow-Origin`
    pub allow_origin: String,
    /// `Access-Control-Allow-Methods`
    pub allow_methods: &'static str,
    /// `Access-Control-Allow-Headers`
    pub allow_headers: &'static str,
    /// `Cache-Control`
    pub cache_control: &'static str,
}

impl ResponseTemplate {
    /// Template for `config`
    #[must_use]
    pub fn from_config(config: &TrustConfig) -> Self {
        Self {
            allow_origin: config.cors_origin().to_string(),
            allow_methods: "GET, POST",
            allow_headers: "authorization",
            cache_control: "no-store",
        }
    }
}

/// A loaded config together with everything derived from it.
#[derive(Debug, Clone)]
pub struct ActiveConfig {
    /// Config as loaded
    pub config: TrustConfig,
    /// Authentication policy
    pub policy: AuthPolicy,
    /// Response headers
    pub template: ResponseTemplate,
}

impl ActiveConfig {
    /// Derive policy and template from `config`
    #[must_use]
    pub fn new(config: TrustConfig) -> Self {
        Self {
            policy: config.auth_policy(),
            template: ResponseTemplate::from_config(&config),
            config,
        }
    }
}

/// Atomically swappable active config.
pub struct LiveConfig {
    inner: RwLock<Arc<ActiveConfig>>,
}

impl LiveConfig {
    /// Seed with the start-up config
    #[must_use]
    pub fn new(config: TrustConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(ActiveConfig::new(config))),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn get(&self) -> Arc<ActiveConfig> {
        self.inner.read().clone()
    }

    /// Replace the active config
    pub fn set(&self, config: TrustConfig) {
        *self.inner.write() = Arc::new(ActiveConfig::new(config));
    }
}

// ============================================================================
// Diff computation (pure, synchronous)
// ============================================================================

/// Structural diff between two [`TrustConfig`] snapshots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigPatch {
    /// JWK provider URLs added / removed
    pub jwk_urls: SetDiff,
    /// Static key ids added / removed
    pub static_keys: SetDiff,
    /// Keys in the new config that could not be decoded
    pub undecodable_keys: usize,
    /// Anything outside trust sources and `engine` changed
    pub settings_changed: bool,
    /// `engine` tunables changed (restart required)
    pub engine_changed: bool,
}

impl ConfigPatch {
    /// Returns `true` when no changes were detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jwk_urls.is_empty()
            && self.static_keys.is_empty()
            && self.undecodable_keys == 0
            && !self.settings_changed
            && !self.engine_changed
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.jwk_urls.to_add.is_empty() {
            parts.push(format!("added JWK URLs: [{}]", self.jwk_urls.to_add.join(", ")));
        }
        if !self.jwk_urls.to_remove.is_empty() {
            parts.push(format!(
                "removed JWK URLs: [{}]",
                self.jwk_urls.to_remove.join(", ")
            ));
        }
        if !self.static_keys.to_add.is_empty() {
            parts.push(format!("added static keys: [{}]", self.static_keys.to_add.join(", ")));
        }
        if !self.static_keys.to_remove.is_empty() {
            parts.push(format!(
                "removed static keys: [{}]",
                self.static_keys.to_remove.join(", ")
            ));
        }
        if self.undecodable_keys > 0 {
            parts.push(format!("{} undecodable static keys skipped", self.undecodable_keys));
        }
        if self.settings_changed {
            parts.push("settings changed".to_string());
        }
        if self.engine_changed {
            parts.push("engine tunables changed (restart required)".to_string());
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Compute the diff between two config snapshots.
///
/// Pure: touches neither the trust store nor the live config.
#[must_use]
pub fn compute_diff(old: &TrustConfig, new: &TrustConfig) -> ConfigPatch {
    let old_ids: Vec<String> = old
        .jwt_public_keys
        .iter()
        .filter_map(|k| key_id_for_base64(k).ok())
        .collect();
    let (new_ids, undecodable): (Vec<_>, Vec<_>) = new
        .jwt_public_keys
        .iter()
        .map(|k| key_id_for_base64(k))
        .partition(std::result::Result::is_ok);
    let new_ids: Vec<String> = new_ids.into_iter().filter_map(std::result::Result::ok).collect();

    let strip = |c: &TrustConfig| TrustConfig {
        jwk_urls: Vec::new(),
        jwt_public_keys: Vec::new(),
        engine: crate::config::EngineConfig::default(),
        ..c.clone()
    };

    ConfigPatch {
        jwk_urls: diff_sets(
            old.jwk_urls.iter().map(String::as_str),
            new.jwk_urls.iter().map(String::as_str),
        ),
        static_keys: diff_sets(
            old_ids.iter().map(String::as_str),
            new_ids.iter().map(String::as_str),
        ),
        undecodable_keys: undecodable.len(),
        settings_changed: strip(old) != strip(new),
        engine_changed: old.engine != new.engine,
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// What one [`TrustConfigReconciler::apply`] did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Config-level diff
    pub patch: ConfigPatch,
    /// Changes actually made to the trust store
    pub outcome: ReconcileOutcome,
}

/// Pushes a desired [`TrustConfig`] into the trust store and live config.
pub struct TrustConfigReconciler {
    store: Arc<TrustStore>,
    live: Arc<LiveConfig>,
}

impl TrustConfigReconciler {
    /// Reconciler over `store` and `live`
    #[must_use]
    pub fn new(store: Arc<TrustStore>, live: Arc<LiveConfig>) -> Self {
        Self { store, live }
    }

    /// Validate `config`, reconcile trust sources, then swap the live config.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] without touching any state when
    /// `config` fails validation.
    pub fn apply(&self, config: TrustConfig) -> Result<ReconcileReport> {
        config.validate()?;

        let current = self.live.get();
        let patch = compute_diff(&current.config, &config);
        let outcome = self.store.reconcile(
            config.jwk_urls.iter().map(String::as_str),
            config.jwt_public_keys.iter().map(String::as_str),
        );
        if patch.engine_changed {
            warn!("Config reload: engine tunables changed, restart required to apply");
        }
        self.live.set(config);

        Ok(ReconcileReport { patch, outcome })
    }

    /// Load `path` and [`apply`](Self::apply) it.
    ///
    /// # Errors
    ///
    /// Any load or validation error; state is left untouched.
    pub fn reload_from(&self, path: &Path) -> Result<ReconcileReport> {
        let config = TrustConfig::load(path)?;
        self.apply(config)
    }
}

// ============================================================================
// File watcher
// ============================================================================

/// Modification marker of the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileMarker {
    modified: Option<SystemTime>,
    len: u64,
}

async fn read_marker(path: &Path) -> Option<FileMarker> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(FileMarker {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Watches the config file and reconciles on change.
pub struct ConfigWatcher {
    /// Kept alive to prevent the OS watcher from being dropped.
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ConfigWatcher {
    /// Start watching `config_path`.
    ///
    /// File events are debounced; the periodic scan catches changes the OS
    /// watcher misses (network filesystems, editors that replace the file).
    /// If no OS watcher can be created the scan alone drives reloads.
    #[must_use]
    pub fn start(
        config_path: PathBuf,
        reconciler: Arc<TrustConfigReconciler>,
        scan_interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (event_tx, event_rx) = tokio::sync::mpsc::channel(32);

        let watcher = match Self::create_notify_watcher(event_tx, &config_path) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "File events unavailable, relying on periodic scan");
                None
            }
        };

        Self::spawn_reload_task(config_path, reconciler, scan_interval, event_rx, shutdown_rx);

        Self {
            _watcher: Mutex::new(watcher),
        }
    }

    /// Create the low-level `notify` watcher.
    fn create_notify_watcher(
        event_tx: tokio::sync::mpsc::Sender<()>,
        config_path: &Path,
    ) -> Result<RecommendedWatcher> {
        let watch_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let file_name = config_path.file_name().map(std::ffi::OsStr::to_os_string);

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| {
                let is_relevant = result
                    .as_ref()
                    .is_ok_and(|e| is_config_event(e, file_name.as_deref()));
                if is_relevant {
                    let _ = event_tx.try_send(());
                }
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| crate::Error::Internal(format!("Failed to create config watcher: {e}")))?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| crate::Error::Internal(format!("Failed to watch config path: {e}")))?;

        Ok(watcher)
    }

    /// Spawn the debounced reload task.
    fn spawn_reload_task(
        config_path: PathBuf,
        reconciler: Arc<TrustConfigReconciler>,
        scan_interval: Duration,
        mut event_rx: tokio::sync::mpsc::Receiver<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            let mut applied = read_marker(&config_path).await;
            let mut last_event: Option<Instant> = None;
            let mut debounce = tokio::time::interval(Duration::from_millis(100));
            let mut scan = tokio::time::interval(scan_interval);
            scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; the start-up config is already applied.
            scan.tick().await;

            loop {
                tokio::select! {
                    Some(()) = event_rx.recv() => {
                        last_event = Some(Instant::now());
                    }
                    _ = debounce.tick() => {
                        if last_event.is_some_and(|t| t.elapsed() >= DEBOUNCE) {
                            last_event = None;
                            reload_if_changed(&config_path, &reconciler, &mut applied).await;
                        }
                    }
                    _ = scan.tick() => {
                        reload_if_changed(&config_path, &reconciler, &mut applied).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Config watcher shutting down");
                        break;
                    }
                }
            }
        });
    }
}

/// Returns `true` for create/modify events on the watched file name.
fn is_config_event(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|n| Some(n) == file_name))
}

/// Reload when the marker differs from the last one seen. The file is read and
/// parsed on the blocking pool.
async fn reload_if_changed(
    config_path: &Path,
    reconciler: &Arc<TrustConfigReconciler>,
    applied: &mut Option<FileMarker>,
) {
    let current = read_marker(config_path).await;
    if current.is_none() || current == *applied {
        debug!(path = %config_path.display(), "Config file unchanged");
        return;
    }
    // Remember the marker even on failure so a broken file is reported once.
    *applied = current;

    let path = config_path.to_path_buf();
    let task_reconciler = Arc::clone(reconciler);
    let reloaded =
        match tokio::task::spawn_blocking(move || task_reconciler.reload_from(&path)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Config reload task failed");
                return;
            }
        };

    match reloaded {
        Ok(report) if report.patch.is_empty() => {
            debug!("Config reload: no changes detected");
        }
        Ok(report) => {
            info!(changes = %report.patch.summary(), "Config reloaded");
            for error in &report.outcome.errors {
                warn!(error = %error, "Config reload: trust source skipped");
            }
        }
        Err(e) => {
            warn!(error = %e, "Config reload failed, keeping current config");
        }
    }
}

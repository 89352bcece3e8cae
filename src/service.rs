//! Service context: every component, wired once at start-up.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use turn_credentials::{Credential, IssueRequest};

use crate::auth::{AuthOutcome, Authenticator, Rejection, TokenRequest, TokenValidator, ValidationCache};
use crate::config::TrustConfig;
use crate::config_reload::{ActiveConfig, LiveConfig, TrustConfigReconciler};
use crate::trust::TrustStore;
use crate::{Error, Result};

/// Why a credential request was refused.
#[derive(Debug, thiserror::Error)]
pub enum TurnRequestError {
    /// Authentication failed
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// Credential could not be derived
    #[error(transparent)]
    Issue(#[from] Error),
}

/// Credential handed to an authenticated caller.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// Credential body
    pub credential: Credential,
    /// How the caller was authenticated
    pub auth: AuthOutcome,
    /// Config snapshot the credential was issued under
    pub active: Arc<ActiveConfig>,
}

/// Owns the trust store, validation cache, authenticator and live config.
pub struct TurnRestService {
    store: Arc<TrustStore>,
    cache: Arc<ValidationCache>,
    authenticator: Authenticator,
    live: Arc<LiveConfig>,
    reconciler: Arc<TrustConfigReconciler>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TurnRestService {
    /// Build every component from the start-up config and register its trust sources.
    ///
    /// Malformed trust sources are logged and skipped.
    pub fn new(config: TrustConfig) -> Result<Self> {
        config.validate()?;
        let engine = config.engine;

        let store = Arc::new(TrustStore::new(
            engine.jwks_fetch_timeout(),
            engine.jwks_cache_ttl(),
        ));
        let cache = Arc::new(ValidationCache::new(
            engine.cache_freshness(),
            engine.cache_sweep(),
        ));
        let validator = TokenValidator::new(Arc::clone(&store), engine.validation_timeout());
        let authenticator = Authenticator::new(Arc::clone(&cache), validator);
        let live = Arc::new(LiveConfig::new(config.clone()));
        let reconciler = Arc::new(TrustConfigReconciler::new(
            Arc::clone(&store),
            Arc::clone(&live),
        ));

        let report = reconciler.apply(config)?;
        for error in &report.outcome.errors {
            warn!(error = %error, "Trust source skipped");
        }
        info!(
            jwk_providers = store.jwk_provider_urls().len(),
            static_keys = store.static_key_ids().len(),
            "Trust store ready"
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            store,
            cache,
            authenticator,
            live,
            reconciler,
            shutdown_tx,
        })
    }

    /// Spawn background maintenance (validation cache sweeper).
    pub fn start(&self) -> JoinHandle<()> {
        self.cache.start(self.shutdown_tx.subscribe())
    }

    /// Signal every background task to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Receiver for the shared shutdown broadcast
    #[must_use]
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Sender for the shared shutdown broadcast
    #[must_use]
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Trust store
    #[must_use]
    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    /// Validation cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ValidationCache> {
        &self.cache
    }

    /// Live config
    #[must_use]
    pub fn live_config(&self) -> &Arc<LiveConfig> {
        &self.live
    }

    /// Config reconciler
    #[must_use]
    pub fn reconciler(&self) -> &Arc<TrustConfigReconciler> {
        &self.reconciler
    }

    /// Authenticate `request` and issue a credential for the resolved user.
    pub async fn handle_turn_request<R: TokenRequest + ?Sized>(
        &self,
        request: &R,
    ) -> std::result::Result<IssuedCredential, TurnRequestError> {
        let active = self.live.get();
        let auth = self
            .authenticator
            .authenticate(request, &active.policy)
            .await?;
        let credential = issue_credential(&active.config, &auth.user, 0)?;
        info!(
            correlation_id = %request.correlation_id(),
            user = %credential.username,
            "Issued TURN credential"
        );
        Ok(IssuedCredential {
            credential,
            auth,
            active,
        })
    }
}

/// Derive a credential for `user` from `config`; `ttl_secs == 0` uses the configured TTL.
pub fn issue_credential(config: &TrustConfig, user: &str, ttl_secs: u64) -> Result<Credential> {
    let request = IssueRequest {
        secret: &config.secret_key,
        forced_user: config.forced_user.as_deref(),
        forced_password: config.forced_password.as_deref(),
        username: user,
        ttl_secs,
        default_ttl_secs: config.ttl,
        turn_uris: &config.turn_uris,
        stun_uris: &config.stun_uris,
    };
    Ok(turn_credentials::issue(&request)?)
}

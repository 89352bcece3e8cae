//! Trust store: the live set of sources allowed to vouch for a token.
//!
//! Two namespaces, each a [`DashMap`] so reconciliation never takes a lock
//! that validators wait on:
//!
//! - JWK providers keyed by URL (or any identifier an embedder registers a
//!   custom [`KeyResolver`] under)
//! - static keys keyed by the lowercase hex SHA-1 of their DER encoding
//!
//! Validators work on a [`TrustStore::snapshot`] of `Arc` handles, so a
//! source removed mid-validation stays usable for that validation.

mod jwks;
mod static_key;

pub use jwks::{DEFAULT_FETCH_TIMEOUT, DEFAULT_JWKS_TTL, HttpJwkProvider, KeyResolver, select_key};
pub use static_key::{StaticKey, key_id_for_base64};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use crate::auth::DecodedToken;
use crate::error::{TokenValidateError, TrustSourceError};

/// One source that may vouch for a token.
#[derive(Clone)]
pub enum TrustSource {
    /// Remote key set resolved through a [`KeyResolver`]
    Jwk {
        /// Identifier (URL) the resolver is registered under
        url: String,
        /// Resolver handle
        resolver: Arc<dyn KeyResolver>,
    },
    /// Static public key
    Static(Arc<StaticKey>),
}

impl TrustSource {
    /// Identifier used in logs and diagnostics
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Jwk { url, .. } => url.clone(),
            Self::Static(key) => format!("static:{}", key.id()),
        }
    }

    /// Verify `token` against this source.
    pub async fn vouch(&self, token: &DecodedToken) -> Result<(), TokenValidateError> {
        match self {
            Self::Jwk { resolver, .. } => {
                let key = resolver.resolve(token.key_id()).await?;
                token.verify_with(&key)
            }
            Self::Static(key) => token.verify_with(key.decoding_key()),
        }
    }
}

/// Result of a pure set difference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    /// In desired, not in current
    pub to_add: Vec<String>,
    /// In current, not in desired
    pub to_remove: Vec<String>,
}

impl SetDiff {
    /// No change
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `to_add = desired - current`, `to_remove = current - desired`, both sorted.
pub fn diff_sets<'a, 'b, C, D>(current: C, desired: D) -> SetDiff
where
    C: IntoIterator<Item = &'a str>,
    D: IntoIterator<Item = &'b str>,
{
    let current: BTreeSet<String> = current.into_iter().map(str::to_string).collect();
    let desired: BTreeSet<String> = desired.into_iter().map(str::to_string).collect();
    SetDiff {
        to_add: desired.difference(&current).cloned().collect(),
        to_remove: current.difference(&desired).cloned().collect(),
    }
}

/// What a [`TrustStore::reconcile`] pass changed.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Provider URLs added / removed
    pub providers: SetDiff,
    /// Static key ids added / removed
    pub static_keys: SetDiff,
    /// Sources that could not be registered; the rest were applied
    pub errors: Vec<TrustSourceError>,
}

/// Concurrent registry of trust sources.
pub struct TrustStore {
    providers: DashMap<String, Arc<dyn KeyResolver>>,
    static_keys: DashMap<String, Arc<StaticKey>>,
    http: reqwest::Client,
    jwks_ttl: Duration,
}

impl TrustStore {
    /// Store whose JWK providers fetch with `fetch_timeout` and cache for `jwks_ttl`.
    #[must_use]
    pub fn new(fetch_timeout: Duration, jwks_ttl: Duration) -> Self {
        Self {
            providers: DashMap::new(),
            static_keys: DashMap::new(),
            http: reqwest::Client::builder()
                .timeout(fetch_timeout)
                .build()
                .unwrap_or_default(),
            jwks_ttl,
        }
    }

    /// Register an HTTP(S) JWKS endpoint. Returns `false` if it was already present.
    pub fn add_jwk_provider(&self, url: &str) -> Result<bool, TrustSourceError> {
        let parsed = url::Url::parse(url).map_err(|e| TrustSourceError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "https" => {}
            "http" => warn!(url = %url, "JWK provider is not HTTPS"),
            other => {
                return Err(TrustSourceError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme {other}"),
                });
            }
        }
        let provider = HttpJwkProvider::new(url, self.http.clone(), self.jwks_ttl);
        Ok(self.add_key_resolver(url, Arc::new(provider)))
    }

    /// Register a custom resolver under `id`. Returns `false` if `id` was already present.
    pub fn add_key_resolver(&self, id: &str, resolver: Arc<dyn KeyResolver>) -> bool {
        match self.providers.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(resolver);
                info!(url = %id, "Added JWK endpoint");
                true
            }
        }
    }

    /// Remove a provider. Returns `true` if it was present.
    pub fn remove_jwk_provider(&self, url: &str) -> bool {
        let removed = self.providers.remove(url).is_some();
        if removed {
            info!(url = %url, "Removed JWK endpoint");
        }
        removed
    }

    /// Register a parsed static key. Returns `false` if its id was already present.
    pub fn add_static_key(&self, key: StaticKey) -> bool {
        match self.static_keys.entry(key.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                info!(key_id = %key.id(), "Added static key");
                slot.insert(Arc::new(key));
                true
            }
        }
    }

    /// Parse and register a base64 SPKI key; returns its id.
    pub fn add_static_key_base64(&self, text: &str) -> Result<String, TrustSourceError> {
        let key = StaticKey::from_base64(text)?;
        let id = key.id().to_string();
        self.add_static_key(key);
        Ok(id)
    }

    /// Remove a static key by id, or by its base64 text when no id matches.
    pub fn remove_static_key(&self, id_or_base64: &str) -> bool {
        let id = if self.static_keys.contains_key(id_or_base64) {
            id_or_base64.to_string()
        } else {
            match key_id_for_base64(id_or_base64) {
                Ok(id) => id,
                Err(_) => return false,
            }
        };
        let removed = self.static_keys.remove(&id).is_some();
        if removed {
            info!(key_id = %id, "Removed static key");
        }
        removed
    }

    /// Make the store hold exactly `urls` and `keys` (base64 SPKI).
    ///
    /// Additions happen before removals. Malformed entries are reported in
    /// [`ReconcileOutcome::errors`] and skipped.
    pub fn reconcile<'a, U, K>(&self, urls: U, keys: K) -> ReconcileOutcome
    where
        U: IntoIterator<Item = &'a str>,
        K: IntoIterator<Item = &'a str>,
    {
        let mut outcome = ReconcileOutcome::default();

        let current_urls = self.jwk_provider_urls();
        let desired_urls: Vec<&str> = urls.into_iter().collect();
        let url_diff = diff_sets(current_urls.iter().map(String::as_str), desired_urls);

        let mut desired_keys = Vec::new();
        for text in keys {
            match StaticKey::from_base64(text) {
                Ok(key) => desired_keys.push(key),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable static key");
                    outcome.errors.push(e);
                }
            }
        }
        let current_ids = self.static_key_ids();
        let key_diff = diff_sets(
            current_ids.iter().map(String::as_str),
            desired_keys.iter().map(StaticKey::id),
        );

        for url in &url_diff.to_add {
            match self.add_jwk_provider(url) {
                Ok(true) => outcome.providers.to_add.push(url.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Skipping JWK provider");
                    outcome.errors.push(e);
                }
            }
        }
        for key in desired_keys {
            let id = key.id().to_string();
            if key_diff.to_add.contains(&id) && self.add_static_key(key) {
                outcome.static_keys.to_add.push(id);
            }
        }

        for url in &url_diff.to_remove {
            if self.remove_jwk_provider(url) {
                outcome.providers.to_remove.push(url.clone());
            }
        }
        for id in &key_diff.to_remove {
            if self.remove_static_key(id) {
                outcome.static_keys.to_remove.push(id.clone());
            }
        }

        outcome
    }

    /// Stable view of every source for one validation pass.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TrustSource> {
        let mut sources: Vec<TrustSource> = self
            .providers
            .iter()
            .map(|entry| TrustSource::Jwk {
                url: entry.key().clone(),
                resolver: Arc::clone(entry.value()),
            })
            .collect();
        sources.extend(
            self.static_keys
                .iter()
                .map(|entry| TrustSource::Static(Arc::clone(entry.value()))),
        );
        sources
    }

    /// Registered provider identifiers, sorted
    #[must_use]
    pub fn jwk_provider_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }

    /// Registered static key ids, sorted
    #[must_use]
    pub fn static_key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.static_keys.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Total number of sources
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len() + self.static_keys.len()
    }

    /// `true` when no source is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every source
    pub fn clear(&self) {
        for url in self.jwk_provider_urls() {
            self.remove_jwk_provider(&url);
        }
        for id in self.static_key_ids() {
            self.remove_static_key(&id);
        }
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT, DEFAULT_JWKS_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const K1: &str = include_str!("../../tests/fixtures/k1_public.der.b64");
    const K2: &str = include_str!("../../tests/fixtures/k2_public.der.b64");
    const K3: &str = include_str!("../../tests/fixtures/k3_public.der.b64");

    #[test]
    fn diff_sets_is_pure_set_arithmetic() {
        let diff = diff_sets(["a", "b"], ["b", "c"]);
        assert_eq!(
            diff,
            SetDiff {
                to_add: vec!["c".to_string()],
                to_remove: vec!["a".to_string()],
            }
        );
        assert!(diff_sets(["a"], ["a"]).is_empty());
    }

    #[test]
    fn adding_a_static_key_twice_keeps_one_entry() {
        let store = TrustStore::default();
        let id = store.add_static_key_base64(K1).unwrap();
        let again = store.add_static_key_base64(K1).unwrap();

        assert_eq!(id, again);
        assert_eq!(store.static_key_ids(), vec![id]);
    }

    #[test]
    fn static_key_removed_by_id_or_base64() {
        let store = TrustStore::default();
        let id1 = store.add_static_key_base64(K1).unwrap();
        store.add_static_key_base64(K2).unwrap();

        assert!(store.remove_static_key(&id1));
        assert!(store.remove_static_key(K2));
        assert!(!store.remove_static_key(K2));
        assert!(store.is_empty());
    }

    #[test]
    fn jwk_provider_add_is_idempotent_and_validated() {
        let store = TrustStore::default();
        assert!(store.add_jwk_provider("https://idp.example.com/jwks").unwrap());
        assert!(!store.add_jwk_provider("https://idp.example.com/jwks").unwrap());
        assert!(store.add_jwk_provider("not a url").is_err());
        assert!(store.add_jwk_provider("ftp://idp.example.com/jwks").is_err());

        assert_eq!(store.len(), 1);
        assert!(store.remove_jwk_provider("https://idp.example.com/jwks"));
        assert!(!store.remove_jwk_provider("https://idp.example.com/jwks"));
    }

    #[test]
    fn reconcile_converges_to_desired_set() {
        let store = TrustStore::default();
        store.reconcile(["https://a.example.com/jwks", "https://b.example.com/jwks"], [K1, K2]);

        let outcome = store.reconcile(
            ["https://b.example.com/jwks", "https://c.example.com/jwks"],
            [K2, K3],
        );

        assert_eq!(
            store.jwk_provider_urls(),
            vec!["https://b.example.com/jwks", "https://c.example.com/jwks"]
        );
        assert_eq!(outcome.providers.to_add, vec!["https://c.example.com/jwks"]);
        assert_eq!(outcome.providers.to_remove, vec!["https://a.example.com/jwks"]);

        let k1 = key_id_for_base64(K1).unwrap();
        let k3 = key_id_for_base64(K3).unwrap();
        assert_eq!(outcome.static_keys.to_add, vec![k3]);
        assert_eq!(outcome.static_keys.to_remove, vec![k1]);
        assert_eq!(store.static_key_ids().len(), 2);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn reconcile_skips_malformed_entries() {
        let store = TrustStore::default();
        let outcome = store.reconcile(["::nope::", "https://a.example.com/jwks"], ["%%%", K1]);

        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn snapshot_survives_removal() {
        let store = TrustStore::default();
        store.add_static_key_base64(K1).unwrap();
        let snapshot = store.snapshot();

        store.clear();

        assert!(store.is_empty());
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].id().starts_with("static:"));
    }
}

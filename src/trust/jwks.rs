//! Remote JWK set providers.
//!
//! # Resolution
//!
//! 1. Serve from the cached set while it is younger than the TTL (default 1 hour).
//! 2. Select the key by `kid`; a token without `kid` is accepted only when
//!    the set holds exactly one key.
//! 3. Unknown `kid` on a cached set triggers a single refetch before failing,
//!    so rotated keys are picked up without re-fetching on every miss.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::TokenValidateError;

/// Default JWKS cache TTL (1 hour)
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Default JWKS fetch timeout (10 seconds)
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves a key id to a verification key, possibly over the network.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Key for `key_id` (or the sole key when `key_id` is `None`)
    async fn resolve(&self, key_id: Option<&str>) -> Result<DecodingKey, TokenValidateError>;
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS endpoint with a TTL cache.
pub struct HttpJwkProvider {
    url: String,
    http: reqwest::Client,
    ttl: Duration,
    cached: RwLock<Option<CachedJwks>>,
}

impl HttpJwkProvider {
    /// Provider for `url` sharing `http`
    #[must_use]
    pub fn new(url: impl Into<String>, http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            http,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn cached_set(&self) -> Option<JwkSet> {
        self.cached
            .read()
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.keys.clone())
    }

    async fn fetch(&self) -> Result<JwkSet, TokenValidateError> {
        debug!(url = %self.url, "Fetching JWKS");
        let keys: JwkSet = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TokenValidateError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| TokenValidateError::Transport(e.to_string()))?;

        *self.cached.write() = Some(CachedJwks {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }
}

#[async_trait]
impl KeyResolver for HttpJwkProvider {
    async fn resolve(&self, key_id: Option<&str>) -> Result<DecodingKey, TokenValidateError> {
        if let Some(keys) = self.cached_set() {
            match select_key(&keys, key_id) {
                Err(TokenValidateError::UnknownKeyId(kid)) => {
                    debug!(url = %self.url, kid = %kid, "Key not found in cached JWKS, refreshing");
                }
                other => return other,
            }
        }
        let keys = self.fetch().await?;
        select_key(&keys, key_id)
    }
}

/// Pick the verification key for `key_id` out of `keys`.
pub fn select_key(keys: &JwkSet, key_id: Option<&str>) -> Result<DecodingKey, TokenValidateError> {
    let jwk = match key_id {
        Some(kid) => keys
            .find(kid)
            .ok_or_else(|| TokenValidateError::UnknownKeyId(kid.to_string()))?,
        None => match keys.keys.as_slice() {
            [only] => only,
            all => return Err(TokenValidateError::MissingKeyId(all.len())),
        },
    };
    decoding_key(jwk)
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, TokenValidateError> {
    DecodingKey::from_jwk(jwk).map_err(|e| TokenValidateError::Verification(e.to_string()))
}

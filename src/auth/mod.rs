//! Per-request authentication.
//!
//! # Decision procedure
//!
//! 1. Policy bypass (`ignoreJWT`) accepts without looking at the request.
//! 2. Extract and structurally decode the bearer token.
//! 3. Check required scopes against the union of `scp` and `scopes`.
//! 4. A fingerprint validated within the freshness window is accepted.
//! 5. Otherwise race the token across every trust source.
//!
//! Steps 2 and 3 reject without consulting any trust source. Every rejection
//! maps to the same unauthorized response; [`Rejection`] only tells operators
//! which branch was taken.

mod cache;
mod token;
mod validator;

pub use cache::{CacheStatsSnapshot, DEFAULT_FRESHNESS, DEFAULT_SWEEP_INTERVAL, ValidationCache};
pub use token::{DecodedToken, TOKEN_QUERY_PARAM, TokenRequest, extract_token};
pub use validator::{DEFAULT_VALIDATION_TIMEOUT, TokenValidator};

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{TokenDecodeError, ValidationFailure};

/// Prefix of usernames synthesized when no user claim applies
pub const AUTO_USER_PREFIX: &str = "AutoUser-";

/// Authentication settings derived from the active configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Accept every request without a token
    pub ignore_auth: bool,
    /// Scopes the token must carry (empty = no requirement)
    pub required_scopes: Vec<String>,
    /// `true`: every required scope; `false`: at least one
    pub require_all_scopes: bool,
    /// Username override, wins over the user claim
    pub forced_user: Option<String>,
    /// Claim holding the username
    pub user_claim: Option<String>,
}

impl AuthPolicy {
    /// Username for an accepted request.
    ///
    /// Forced user, else the non-empty user claim, else `AutoUser-<correlation id>`.
    #[must_use]
    pub fn resolve_user(&self, token: Option<&DecodedToken>, correlation_id: &str) -> String {
        if let Some(forced) = &self.forced_user {
            return forced.clone();
        }
        self.user_claim
            .as_deref()
            .zip(token)
            .and_then(|(claim, token)| token.string_claim(claim))
            .map_or_else(|| format!("{AUTO_USER_PREFIX}{correlation_id}"), str::to_string)
    }
}

/// `true` when `present` satisfies `required` under the any/all rule.
pub fn scopes_satisfied(required: &[String], require_all: bool, present: &BTreeSet<String>) -> bool {
    if required.is_empty() {
        return true;
    }
    if require_all {
        required.iter().all(|scope| present.contains(scope))
    } else {
        required.iter().any(|scope| present.contains(scope))
    }
}

/// How an accepted request was decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSource {
    /// Policy bypass
    Bypassed,
    /// Fingerprint found fresh in the validation cache
    Cached,
    /// Trust source that vouched
    Verified {
        /// Source id
        source: String,
    },
}

/// Accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Username to embed in the credential
    pub user: String,
    /// Decision path
    pub source: AuthSource,
}

/// Rejected request.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    /// Token missing or malformed
    #[error("token decode failed: {0}")]
    Decode(#[from] TokenDecodeError),

    /// Token lacks the required scopes
    #[error("missing required scopes {required:?} (token has {present:?})")]
    Scope {
        /// Configured requirement
        required: Vec<String>,
        /// Scopes on the token
        present: Vec<String>,
    },

    /// No trust source vouched for the token
    #[error("{0}")]
    Untrusted(ValidationFailure),
}

/// Orchestrates cache and validator for one request.
pub struct Authenticator {
    cache: Arc<ValidationCache>,
    validator: TokenValidator,
}

impl Authenticator {
    /// Authenticator over a shared cache and a validator
    #[must_use]
    pub fn new(cache: Arc<ValidationCache>, validator: TokenValidator) -> Self {
        Self { cache, validator }
    }

    /// Validation cache in use
    #[must_use]
    pub fn cache(&self) -> &Arc<ValidationCache> {
        &self.cache
    }

    /// Decide whether `request` may receive a credential under `policy`.
    pub async fn authenticate<R: TokenRequest + ?Sized>(
        &self,
        request: &R,
        policy: &AuthPolicy,
    ) -> Result<AuthOutcome, Rejection> {
        let correlation_id = request.correlation_id();

        if policy.ignore_auth {
            info!(correlation_id = %correlation_id, "Token checks disabled by config, skipping");
            return Ok(AuthOutcome {
                user: policy.resolve_user(None, correlation_id),
                source: AuthSource::Bypassed,
            });
        }

        let token = match extract_token(request).and_then(|raw| DecodedToken::decode(&raw)) {
            Ok(token) => Arc::new(token),
            Err(e) => {
                info!(correlation_id = %correlation_id, error = %e, "Could not decode token");
                return Err(e.into());
            }
        };

        let present = token.scopes();
        if !scopes_satisfied(&policy.required_scopes, policy.require_all_scopes, &present) {
            info!(correlation_id = %correlation_id, "Token lacks required scopes");
            return Err(Rejection::Scope {
                required: policy.required_scopes.clone(),
                present: present.into_iter().collect(),
            });
        }

        let fingerprint = token.fingerprint();
        let source = if self.cache.is_fresh(&fingerprint) {
            debug!(correlation_id = %correlation_id, "Token found in validation cache");
            AuthSource::Cached
        } else {
            match self.validator.validate(&token).await {
                Ok(source) => {
                    self.cache.mark_valid(&fingerprint);
                    AuthSource::Verified { source }
                }
                Err(failure) => {
                    warn!(correlation_id = %correlation_id, "Token rejected: {failure}");
                    return Err(Rejection::Untrusted(failure));
                }
            }
        };

        let user = policy.resolve_user(Some(&token), correlation_id);
        info!(correlation_id = %correlation_id, user = %user, "Token accepted");
        Ok(AuthOutcome { user, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::{Value, json};

    use crate::trust::TrustStore;

    struct Req(Option<String>);

    impl TokenRequest for Req {
        fn header(&self, name: &str) -> Option<&str> {
            if name.eq_ignore_ascii_case("authorization") {
                self.0.as_deref()
            } else {
                None
            }
        }

        fn query_param(&self, _name: &str) -> Option<&str> {
            None
        }

        fn correlation_id(&self) -> &str {
            "ABCDEFGHIJKLMNO"
        }
    }

    fn unsigned(claims: &Value) -> String {
        let enc = |v: &Value| {
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(v).unwrap())
        };
        format!("{}.{}.c2ln", enc(&json!({"alg": "RS256", "kid": "k1"})), enc(claims))
    }

    fn scopes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn required(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn authenticator() -> Authenticator {
        let store = Arc::new(TrustStore::default());
        Authenticator::new(
            Arc::new(ValidationCache::default()),
            TokenValidator::new(store, DEFAULT_VALIDATION_TIMEOUT),
        )
    }

    #[test]
    fn scope_rules() {
        let ab = required(&["a", "b"]);
        assert!(!scopes_satisfied(&ab, true, &scopes(&["a"])));
        assert!(scopes_satisfied(&ab, true, &scopes(&["a", "b"])));
        assert!(scopes_satisfied(&ab, false, &scopes(&["b", "z"])));
        assert!(!scopes_satisfied(&ab, false, &scopes(&[])));
        assert!(scopes_satisfied(&[], true, &scopes(&[])));
    }

    #[test]
    fn user_resolution_order() {
        let token = DecodedToken::decode(&unsigned(&json!({"email": "a@example.com", "blank": ""}))).unwrap();

        let forced = AuthPolicy {
            forced_user: Some("relay".to_string()),
            user_claim: Some("email".to_string()),
            ..AuthPolicy::default()
        };
        assert_eq!(forced.resolve_user(Some(&token), "CID"), "relay");

        let claim = AuthPolicy {
            user_claim: Some("email".to_string()),
            ..AuthPolicy::default()
        };
        assert_eq!(claim.resolve_user(Some(&token), "CID"), "a@example.com");

        let blank = AuthPolicy {
            user_claim: Some("blank".to_string()),
            ..AuthPolicy::default()
        };
        assert_eq!(blank.resolve_user(Some(&token), "CID"), "AutoUser-CID");
        assert_eq!(claim.resolve_user(None, "CID"), "AutoUser-CID");
    }

    #[tokio::test]
    async fn bypass_accepts_without_token() {
        let policy = AuthPolicy {
            ignore_auth: true,
            ..AuthPolicy::default()
        };
        let outcome = authenticator().authenticate(&Req(None), &policy).await.unwrap();

        assert_eq!(outcome.source, AuthSource::Bypassed);
        assert_eq!(outcome.user, "AutoUser-ABCDEFGHIJKLMNO");
    }

    #[tokio::test]
    async fn missing_token_is_a_decode_rejection() {
        let err = authenticator()
            .authenticate(&Req(None), &AuthPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Rejection::Decode(TokenDecodeError::Missing)));
    }

    #[tokio::test]
    async fn scope_failure_skips_validation() {
        let policy = AuthPolicy {
            required_scopes: required(&["turn"]),
            ..AuthPolicy::default()
        };
        let raw = unsigned(&json!({"scp": ["stun"]}));
        let auth = authenticator();

        let err = auth.authenticate(&Req(Some(raw)), &policy).await.unwrap_err();

        assert!(matches!(err, Rejection::Scope { .. }));
        // Validator never ran, so the cache was never consulted
        assert_eq!(auth.cache().stats().misses, 0);
    }

    #[tokio::test]
    async fn fresh_fingerprint_skips_validation() {
        let raw = unsigned(&json!({"sub": "alice"}));
        let auth = authenticator();
        auth.cache()
            .mark_valid(&DecodedToken::decode(&raw).unwrap().fingerprint());

        let outcome = auth
            .authenticate(&Req(Some(format!("Bearer {raw}"))), &AuthPolicy::default())
            .await
            .unwrap();

        assert_eq!(outcome.source, AuthSource::Cached);
    }

    #[tokio::test]
    async fn untrusted_token_is_rejected_and_not_cached() {
        let raw = unsigned(&json!({"sub": "alice"}));
        let auth = authenticator();

        let err = auth
            .authenticate(&Req(Some(raw)), &AuthPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Rejection::Untrusted(_)));
        assert!(auth.cache().is_empty());
    }
}

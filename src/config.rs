//! Configuration file handling
//!
//! The file is a flat JSON object. Every key is optional; lists default to
//! empty and `ttl` to 12 hours.
//!
//! ```json
//! {
//!   "secretKey": "north-secret",
//!   "turnURIS": ["turn:turn.example.com:3478?transport=udp"],
//!   "stunURIS": ["stun:turn.example.com:3478"],
//!   "jwkURLs": ["https://idp.example.com/.well-known/jwks.json"],
//!   "jwtPublicKeys": ["MIIBIjANBgkqh..."],
//!   "requiredJWTScope": ["turn"],
//!   "userClaim": "email",
//!   "ttl": 3600,
//!   "engine": { "validationTimeoutMs": 5000 }
//! }
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Json},
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthPolicy;
use crate::{Error, Result};

/// Desired service state, as loaded from the config file.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrustConfig {
    /// Shared secret configured on the TURN server
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    /// `Access-Control-Allow-Origin` value; `*` when unset
    #[serde(rename = "allowedOrigin")]
    pub allowed_origin: Option<String>,
    /// Skip token checks entirely
    #[serde(rename = "ignoreJWT")]
    pub ignore_jwt: bool,
    /// Username override
    #[serde(rename = "forcedUser")]
    pub forced_user: Option<String>,
    /// Password override; disables HMAC derivation
    #[serde(rename = "forcedPassword")]
    pub forced_password: Option<String>,
    /// TURN URIs handed out with credentials
    #[serde(rename = "turnURIS")]
    pub turn_uris: Vec<String>,
    /// STUN URIs handed out without credentials
    #[serde(rename = "stunURIS")]
    pub stun_uris: Vec<String>,
    /// JWKS endpoints trusted to sign tokens
    #[serde(rename = "jwkURLs")]
    pub jwk_urls: Vec<String>,
    /// Static RSA keys (base64 SPKI DER) trusted to sign tokens
    #[serde(rename = "jwtPublicKeys")]
    pub jwt_public_keys: Vec<String>,
    /// Scopes a token must carry
    #[serde(rename = "requiredJWTScope")]
    pub required_scopes: Vec<String>,
    /// Require every scope instead of any
    #[serde(rename = "requireAllScopes")]
    pub require_all_scopes: bool,
    /// Claim holding the username
    #[serde(rename = "userClaim")]
    pub user_claim: Option<String>,
    /// Credential lifetime in seconds
    pub ttl: u64,
    /// Start-up tunables
    pub engine: EngineConfig,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            allowed_origin: None,
            ignore_jwt: false,
            forced_user: None,
            forced_password: None,
            turn_uris: Vec::new(),
            stun_uris: Vec::new(),
            jwk_urls: Vec::new(),
            jwt_public_keys: Vec::new(),
            required_scopes: Vec::new(),
            require_all_scopes: false,
            user_claim: None,
            ttl: turn_credentials::DEFAULT_TTL_SECS,
            engine: EngineConfig::default(),
        }
    }
}

/// Tunables read once at start-up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Deadline for one token validation
    pub validation_timeout_ms: u64,
    /// Validation cache freshness window
    pub cache_freshness_ms: u64,
    /// Validation cache sweep period
    pub cache_sweep_ms: u64,
    /// How long a fetched JWK set is reused
    pub jwks_cache_ttl_secs: u64,
    /// HTTP timeout for JWK set fetches
    pub jwks_fetch_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation_timeout_ms: 10_000,
            cache_freshness_ms: 300_000,
            cache_sweep_ms: 30_000,
            jwks_cache_ttl_secs: 3600,
            jwks_fetch_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Validation deadline
    #[must_use]
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// Cache freshness window
    #[must_use]
    pub fn cache_freshness(&self) -> Duration {
        Duration::from_millis(self.cache_freshness_ms)
    }

    /// Cache sweep period (at least 1 ms)
    #[must_use]
    pub fn cache_sweep(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_ms.max(1))
    }

    /// JWK set TTL
    #[must_use]
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }

    /// JWK set fetch timeout
    #[must_use]
    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.jwks_fetch_timeout_ms)
    }
}

impl TrustConfig {
    /// Load and validate the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file does not exist, cannot be
    /// parsed, or fails [`TrustConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::extract(Figment::from(Json::file(path)))
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        Self::extract(Figment::from(Json::string(text)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Treat empty override strings as unset.
    fn normalized(mut self) -> Self {
        for field in [
            &mut self.allowed_origin,
            &mut self.forced_user,
            &mut self.forced_password,
            &mut self.user_claim,
        ] {
            if field.as_deref().is_some_and(str::is_empty) {
                *field = None;
            }
        }
        self
    }

    /// A config must be able to mint a credential.
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.is_empty() && self.forced_password.is_none() {
            return Err(Error::Config(
                "either secretKey or forcedPassword must be set".to_string(),
            ));
        }
        if self.engine.validation_timeout_ms == 0 {
            return Err(Error::Config(
                "engine.validationTimeoutMs must be greater than zero".to_string(),
            ));
        }
        if self.engine.cache_freshness_ms == 0 {
            return Err(Error::Config(
                "engine.cacheFreshnessMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Authentication policy derived from this config
    #[must_use]
    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            ignore_auth: self.ignore_jwt,
            required_scopes: self.required_scopes.clone(),
            require_all_scopes: self.require_all_scopes,
            forced_user: self.forced_user.clone(),
            user_claim: self.user_claim.clone(),
        }
    }

    /// `Access-Control-Allow-Origin` value
    #[must_use]
    pub fn cors_origin(&self) -> &str {
        self.allowed_origin.as_deref().unwrap_or("*")
    }
}

impl fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustConfig")
            .field("secret_key", &"<redacted>")
            .field("allowed_origin", &self.allowed_origin)
            .field("ignore_jwt", &self.ignore_jwt)
            .field("forced_user", &self.forced_user)
            .field(
                "forced_password",
                &self.forced_password.as_ref().map(|_| "<redacted>"),
            )
            .field("turn_uris", &self.turn_uris)
            .field("stun_uris", &self.stun_uris)
            .field("jwk_urls", &self.jwk_urls)
            .field("jwt_public_keys", &self.jwt_public_keys.len())
            .field("required_scopes", &self.required_scopes)
            .field("require_all_scopes", &self.require_all_scopes)
            .field("user_claim", &self.user_claim)
            .field("ttl", &self.ttl)
            .field("engine", &self.engine)
            .finish()
    }
}

/// One-line summary for logs; never includes secrets.
impl fmt::Display for TrustConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "turn_uris={} stun_uris={} jwk_urls={} static_keys={} scopes={} ignore_jwt={} forced_password={} ttl={}s",
            self.turn_uris.len(),
            self.stun_uris.len(),
            self.jwk_urls.len(),
            self.jwt_public_keys.len(),
            self.required_scopes.len(),
            self.ignore_jwt,
            self.forced_password.is_some(),
            self.ttl,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_keys() {
        let config = TrustConfig::from_json(r#"{"secretKey": "s"}"#).unwrap();

        assert_eq!(config.ttl, 43_200);
        assert!(config.turn_uris.is_empty());
        assert!(!config.ignore_jwt);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.cors_origin(), "*");
    }

    #[test]
    fn file_key_names_are_read() {
        let config = TrustConfig::from_json(
            r#"{
                "secretKey": "s",
                "allowedOrigin": "https://app.example.com",
                "ignoreJWT": true,
                "forcedUser": "relay",
                "turnURIS": ["turn:a"],
                "stunURIS": ["stun:a"],
                "jwkURLs": ["https://idp/jwks"],
                "jwtPublicKeys": ["AAAA"],
                "requiredJWTScope": ["turn"],
                "requireAllScopes": true,
                "userClaim": "email",
                "ttl": 60,
                "engine": {"validationTimeoutMs": 250}
            }"#,
        )
        .unwrap();

        assert_eq!(config.cors_origin(), "https://app.example.com");
        assert_eq!(config.turn_uris, vec!["turn:a"]);
        assert_eq!(config.stun_uris, vec!["stun:a"]);
        assert_eq!(config.jwk_urls, vec!["https://idp/jwks"]);
        assert_eq!(config.jwt_public_keys, vec!["AAAA"]);
        assert_eq!(config.ttl, 60);
        assert_eq!(config.engine.validation_timeout(), Duration::from_millis(250));
        assert_eq!(config.engine.cache_freshness_ms, 300_000);

        let policy = config.auth_policy();
        assert!(policy.ignore_auth);
        assert!(policy.require_all_scopes);
        assert_eq!(policy.required_scopes, vec!["turn"]);
        assert_eq!(policy.forced_user.as_deref(), Some("relay"));
        assert_eq!(policy.user_claim.as_deref(), Some("email"));
    }

    #[test]
    fn empty_overrides_are_unset() {
        let config =
            TrustConfig::from_json(r#"{"secretKey": "s", "forcedUser": "", "userClaim": ""}"#).unwrap();
        assert_eq!(config.forced_user, None);
        assert_eq!(config.user_claim, None);
    }

    #[test]
    fn config_without_secret_or_forced_password_is_rejected() {
        assert!(matches!(TrustConfig::from_json("{}"), Err(Error::Config(_))));
        assert!(TrustConfig::from_json(r#"{"forcedPassword": "p"}"#).is_ok());
    }

    #[test]
    fn zero_engine_timeouts_are_rejected() {
        let err = TrustConfig::from_json(r#"{"secretKey": "s", "engine": {"validationTimeoutMs": 0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("validationTimeoutMs"));

        let err = TrustConfig::from_json(r#"{"secretKey": "s", "engine": {"cacheFreshnessMs": 0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("cacheFreshnessMs"));

        assert!(TrustConfig::from_json(r#"{"secretKey": "s", "engine": {"cacheSweepMs": 0}}"#).is_ok());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            TrustConfig::from_json(r#"{"secretKey": "#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            TrustConfig::from_json(r#"{"secretKey": "s", "ttl": "soon"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_reads_file_and_reports_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"secretKey": "from-file"}}"#).unwrap();

        let config = TrustConfig::load(file.path()).unwrap();
        assert_eq!(config.secret_key, "from-file");

        let err = TrustConfig::load(Path::new("/nonexistent/turnrest.json")).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn secrets_never_rendered() {
        let config =
            TrustConfig::from_json(r#"{"secretKey": "hunter2", "forcedPassword": "swordfish"}"#)
                .unwrap();
        let rendered = format!("{config} {config:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("swordfish"));
    }
}

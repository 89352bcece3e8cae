//! Bearer token extraction, structural decode and signature verification.

use std::collections::{BTreeSet, HashSet};

use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

use crate::error::{TokenDecodeError, TokenValidateError};

/// Clock skew tolerated on `exp`/`nbf`
const LEEWAY_SECS: u64 = 60;

/// Query parameter consulted when no `Authorization` header is present
pub const TOKEN_QUERY_PARAM: &str = "jwt";

/// Request surface the authenticator needs from the HTTP layer.
pub trait TokenRequest {
    /// Single header value by (case-insensitive) name
    fn header(&self, name: &str) -> Option<&str>;
    /// Single query parameter by name
    fn query_param(&self, name: &str) -> Option<&str>;
    /// Opaque per-request id, used for logging and synthesized usernames
    fn correlation_id(&self) -> &str;
}

/// Pull the compact token out of a request.
///
/// `Authorization` wins; a leading `Bearer ` (any case) is stripped when
/// present, otherwise the raw header value is used. A header that is present
/// but carries no token is `Missing`; the `jwt` query parameter is only
/// consulted when the header is absent.
pub fn extract_token<R: TokenRequest + ?Sized>(request: &R) -> Result<String, TokenDecodeError> {
    if let Some(value) = request.header("authorization") {
        let value = value.trim();
        let token = match value.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
            _ if value.eq_ignore_ascii_case("bearer") => "",
            _ => value,
        };
        if token.is_empty() {
            return Err(TokenDecodeError::Missing);
        }
        return Ok(token.to_string());
    }

    request
        .query_param(TOKEN_QUERY_PARAM)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(TokenDecodeError::Missing)
}

/// A structurally decoded (not yet verified) compact JWS.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    raw: String,
    header: Header,
    claims: Map<String, Value>,
}

impl DecodedToken {
    /// Decode header and payload without checking the signature.
    pub fn decode(raw: &str) -> Result<Self, TokenDecodeError> {
        let segments = raw.split('.').count();
        if segments != 3 {
            return Err(TokenDecodeError::Segments(segments));
        }

        let header =
            jsonwebtoken::decode_header(raw).map_err(|e| TokenDecodeError::Header(e.to_string()))?;

        let payload = raw.split('.').nth(1).unwrap_or_default();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| TokenDecodeError::Payload(e.to_string()))?;
        let claims = match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(TokenDecodeError::Payload("not a JSON object".to_string())),
            Err(e) => return Err(TokenDecodeError::Payload(e.to_string())),
        };

        Ok(Self {
            raw: raw.to_string(),
            header,
            claims,
        })
    }

    /// Original compact form
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// `kid` header, if any
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// `alg` header
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Raw claim by name
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Claim by name when it is a non-empty string
    #[must_use]
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claim(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Union of the `scp` and `scopes` claims.
    ///
    /// Each claim may be a JSON array of strings or a space-separated string.
    #[must_use]
    pub fn scopes(&self) -> BTreeSet<String> {
        ["scp", "scopes"]
            .iter()
            .filter_map(|name| self.claim(name))
            .flat_map(scope_values)
            .collect()
    }

    /// Lowercase hex SHA-1 of the raw compact string; the validation cache key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha1::digest(self.raw.as_bytes()))
    }

    /// Verify the signature against `key` and enforce `exp`/`nbf` when present.
    pub fn verify_with(&self, key: &DecodingKey) -> Result<(), TokenValidateError> {
        let alg = self.header.alg;
        if !is_asymmetric(alg) {
            return Err(TokenValidateError::UnsupportedAlgorithm(format!("{alg:?}")));
        }

        let mut validation = Validation::new(alg);
        validation.leeway = LEEWAY_SECS;
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.required_spec_claims = HashSet::new();

        jsonwebtoken::decode::<Value>(&self.raw, key, &validation)
            .map(|_| ())
            .map_err(|e| TokenValidateError::Verification(e.to_string()))
    }
}

fn scope_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
    )
}

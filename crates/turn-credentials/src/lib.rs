//! TURN REST API ephemeral credentials.
//!
//! Implements the credential half of the "REST API for TURN Server" scheme
//! (coturn `--use-auth-secret`):
//!
//! ```text
//! username   = "<unix expiry seconds>:<user>"
//! credential = base64(HMAC-SHA1(shared secret, username))
//! ```
//!
//! Everything here is a pure function of its inputs plus the wall clock used
//! for the expiry. No network, disk or shared state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, KeyInit, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Default credential lifetime: 12 hours.
pub const DEFAULT_TTL_SECS: u64 = 60 * 60 * 12;

/// Credential derivation errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The shared secret could not key the HMAC.
    #[error("invalid shared secret: {0}")]
    InvalidSecret(String),
}

/// ICE server entry handed to WebRTC clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    /// `turn:`/`turns:`/`stun:` URIs
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Username (TURN entries only)
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Password (TURN entries only)
    pub credential: Option<String>,
}

/// Issued credential, serialized as the TURN REST response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// `"<expiry>:<user>"`, or the forced user verbatim
    pub username: String,
    /// base64 HMAC-SHA1, or the forced password verbatim
    pub password: String,
    /// Lifetime in seconds
    pub ttl: u64,
    /// TURN entry first, then an optional credential-less STUN entry
    pub ice_servers: Vec<IceServer>,
}

/// Inputs for [`issue`].
#[derive(Debug, Clone, Copy)]
pub struct IssueRequest<'a> {
    /// Shared secret configured on the TURN server
    pub secret: &'a str,
    /// Forced username (only honoured together with `forced_password`)
    pub forced_user: Option<&'a str>,
    /// Forced password; bypasses HMAC derivation entirely
    pub forced_password: Option<&'a str>,
    /// Resolved user fragment embedded after the expiry
    pub username: &'a str,
    /// Requested lifetime; `0` selects `default_ttl_secs`
    pub ttl_secs: u64,
    /// Lifetime used when `ttl_secs` is `0`
    pub default_ttl_secs: u64,
    /// TURN URIs for the credentialed entry
    pub turn_uris: &'a [String],
    /// STUN URIs; an empty list omits the STUN entry
    pub stun_uris: &'a [String],
}

/// Issue a credential expiring `ttl` seconds from now.
pub fn issue(request: &IssueRequest<'_>) -> Result<Credential, CredentialError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    issue_at(request, now)
}

/// Issue a credential as if the current time were `now_unix_secs`.
pub fn issue_at(request: &IssueRequest<'_>, now_unix_secs: u64) -> Result<Credential, CredentialError> {
    let ttl = if request.ttl_secs > 0 {
        request.ttl_secs
    } else {
        request.default_ttl_secs
    };

    let (username, password) = if let Some(forced_password) = request.forced_password {
        // Forced pair carries no expiry semantics.
        let user = request.forced_user.unwrap_or(request.username);
        (user.to_string(), forced_password.to_string())
    } else {
        let expiry = now_unix_secs.saturating_add(ttl);
        let user = format!("{expiry}:{}", request.username);
        let password = sign_username(request.secret, &user)?;
        (user, password)
    };

    let mut ice_servers = vec![IceServer {
        urls: request.turn_uris.to_vec(),
        username: Some(username.clone()),
        credential: Some(password.clone()),
    }];
    if !request.stun_uris.is_empty() {
        ice_servers.push(IceServer {
            urls: request.stun_uris.to_vec(),
            username: None,
            credential: None,
        });
    }

    Ok(Credential {
        username,
        password,
        ttl,
        ice_servers,
    })
}

/// `base64(HMAC-SHA1(secret, username))`
pub fn sign_username(secret: &str, username: &str) -> Result<String, CredentialError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| CredentialError::InvalidSecret(e.to_string()))?;
    mac.update(username.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Split a derived username into its expiry and user fragment.
///
/// Returns `None` for forced usernames that carry no expiry prefix.
pub fn parse_username(username: &str) -> Option<(u64, &str)> {
    let (expiry, user) = username.split_once(':')?;
    Some((expiry.parse().ok()?, user))
}

//! Error types for the TURN REST service

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for the TURN REST service
pub type Result<T> = std::result::Result<T, Error>;

/// Service-level errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be read, parsed or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// Trust source could not be registered
    #[error("Trust source error: {0}")]
    Trust(#[from] TrustSourceError),

    /// Credential derivation failed
    #[error("Credential error: {0}")]
    Credential(#[from] turn_credentials::CredentialError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A compact token could not be extracted or structurally decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenDecodeError {
    /// No `Authorization` header and no `jwt` query parameter
    #[error("no token in Authorization header or jwt query parameter")]
    Missing,

    /// Not three dot-separated segments
    #[error("malformed compact token: expected 3 segments, got {0}")]
    Segments(usize),

    /// Header segment is not a valid JOSE header
    #[error("invalid token header: {0}")]
    Header(String),

    /// Payload segment is not a base64url JSON object
    #[error("invalid token payload: {0}")]
    Payload(String),
}

/// One trust source declined to vouch for a token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenValidateError {
    /// The token carries no `kid` and the key set is ambiguous
    #[error("token has no key id and the key set holds {0} keys")]
    MissingKeyId(usize),

    /// The key id is not served by the provider
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    /// Signature or registered-claim verification failed
    #[error("verification failed: {0}")]
    Verification(String),

    /// The key set could not be fetched or parsed
    #[error("JWKS fetch failed: {0}")]
    Transport(String),

    /// Only RSA and EC signature families are accepted
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The validation task panicked or was aborted
    #[error("validation task failed: {0}")]
    Task(String),
}

/// A provider URL or static key could not be registered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustSourceError {
    /// JWK provider URL does not parse or is not http(s)
    #[error("invalid JWK provider URL {url}: {reason}")]
    InvalidUrl {
        /// Offending URL as configured
        url: String,
        /// Parser message
        reason: String,
    },

    /// Static key is not base64 SPKI DER of an RSA key
    #[error("invalid static public key: {0}")]
    InvalidKey(String),
}

/// Aggregate outcome of a failed validation across every trust source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationFailure {
    /// `(source id, reason)` for every source that reported before the deadline
    pub failures: Vec<(String, TokenValidateError)>,
    /// Deadline elapsed before every source reported
    pub timed_out: bool,
    /// Sources that had not reported when the decision was taken
    pub pending: usize,
}

impl ValidationFailure {
    /// No trust source was configured at all.
    #[must_use]
    pub fn no_sources(&self) -> bool {
        self.failures.is_empty() && self.pending == 0 && !self.timed_out
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.no_sources() {
            return write!(f, "no trust sources configured");
        }
        write!(f, "no trust source vouched for the token")?;
        if self.timed_out {
            write!(f, " (timed out with {} pending)", self.pending)?;
        }
        for (source, reason) in &self.failures {
            write!(f, "\n  {source}: {reason}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failure_lists_every_source() {
        let failure = ValidationFailure {
            failures: vec![
                (
                    "https://idp.example.com/jwks".to_string(),
                    TokenValidateError::UnknownKeyId("k9".to_string()),
                ),
                (
                    "static:ab12".to_string(),
                    TokenValidateError::Verification("InvalidSignature".to_string()),
                ),
            ],
            timed_out: true,
            pending: 1,
        };
        let text = failure.to_string();

        assert!(text.starts_with("no trust source vouched for the token (timed out with 1 pending)"));
        assert!(text.contains("https://idp.example.com/jwks: unknown key id: k9"));
        assert!(text.contains("static:ab12: verification failed: InvalidSignature"));
    }

    #[test]
    fn empty_failure_reports_no_sources() {
        let failure = ValidationFailure::default();
        assert!(failure.no_sources());
        assert_eq!(failure.to_string(), "no trust sources configured");
    }

    #[test]
    fn io_and_config_errors_render_their_cause() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "turnrest.json").into();
        assert_eq!(err.to_string(), "IO error: turnrest.json");
        assert_eq!(
            Error::Config("secretKey is empty".to_string()).to_string(),
            "Configuration error: secretKey is empty"
        );
    }

    #[test]
    fn trust_error_converts_into_service_error() {
        let err: Error = TrustSourceError::InvalidKey("bad base64".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Trust source error: invalid static public key: bad base64"
        );
    }
}

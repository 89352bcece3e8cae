//! Static RSA public keys configured as base64 SPKI DER.

use std::fmt;

use base64::Engine;
use jsonwebtoken::DecodingKey;
use sha1::{Digest, Sha1};

use crate::error::TrustSourceError;

/// An in-memory RSA public key identified by the SHA-1 of its DER encoding.
#[derive(Clone)]
pub struct StaticKey {
    id: String,
    key: DecodingKey,
}

impl StaticKey {
    /// Parse base64 (standard alphabet, whitespace ignored) SubjectPublicKeyInfo DER.
    pub fn from_base64(text: &str) -> Result<Self, TrustSourceError> {
        let der = decode_base64(text)?;
        Self::from_der(&der)
    }

    /// Parse SubjectPublicKeyInfo DER bytes.
    pub fn from_der(der: &[u8]) -> Result<Self, TrustSourceError> {
        let key = DecodingKey::from_rsa_pem(spki_pem(der).as_bytes())
            .map_err(|e| TrustSourceError::InvalidKey(e.to_string()))?;
        Ok(Self {
            id: key_id_for_der(der),
            key,
        })
    }

    /// Lowercase hex SHA-1 of the DER bytes
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key handle for signature verification
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for StaticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKey").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Identifier of a base64 key without parsing it as a key.
pub fn key_id_for_base64(text: &str) -> Result<String, TrustSourceError> {
    decode_base64(text).map(|der| key_id_for_der(&der))
}

fn key_id_for_der(der: &[u8]) -> String {
    hex::encode(Sha1::digest(der))
}

fn decode_base64(text: &str) -> Result<Vec<u8>, TrustSourceError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| TrustSourceError::InvalidKey(e.to_string()))
}

fn spki_pem(der: &[u8]) -> String {
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::with_capacity(body.len() + 64);
    pem.push_str("-----BEGIN PUBLIC KEY-----\n");
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem
}

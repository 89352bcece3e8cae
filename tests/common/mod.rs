//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use turn_rest::auth::TokenRequest;

pub const K1_PRIVATE: &[u8] = include_bytes!("../fixtures/k1_private.pem");
pub const K2_PRIVATE: &[u8] = include_bytes!("../fixtures/k2_private.pem");
pub const K1_PUBLIC: &str = include_str!("../fixtures/k1_public.der.b64");
pub const K2_PUBLIC: &str = include_str!("../fixtures/k2_public.der.b64");
pub const K3_PUBLIC: &str = include_str!("../fixtures/k3_public.der.b64");
pub const K1_MODULUS: &str = include_str!("../fixtures/k1_modulus.b64url");
pub const K2_MODULUS: &str = include_str!("../fixtures/k2_modulus.b64url");

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// RS256 token signed with `private_pem`.
pub fn sign(private_pem: &[u8], kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &EncodingKey::from_rsa_pem(private_pem).unwrap()).unwrap()
}

pub fn k1_token(claims: &Value) -> String {
    sign(K1_PRIVATE, Some("k1"), claims)
}

/// JWK for the RSA modulus `n` under `kid`.
pub fn rsa_jwk(kid: &str, n: &str) -> Value {
    json!({"kty": "RSA", "alg": "RS256", "use": "sig", "kid": kid, "n": n.trim(), "e": "AQAB"})
}

/// Minimal config JSON with a secret and one TURN URI, merged with `extra`.
pub fn config_json(extra: &Value) -> String {
    let mut base = json!({
        "secretKey": "north-secret",
        "turnURIS": ["turn:turn.example.com:3478?transport=udp"],
        "stunURIS": ["stun:turn.example.com:3478"],
    });
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    base.to_string()
}

/// Serve `app` on an ephemeral loopback port.
pub async fn spawn_app(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// In-memory request carrying an optional bearer header.
pub struct BearerRequest {
    pub authorization: Option<String>,
    pub jwt_param: Option<String>,
}

impl BearerRequest {
    pub fn bearer(token: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {token}")),
            jwt_param: None,
        }
    }
}

impl TokenRequest for BearerRequest {
    fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("authorization") {
            self.authorization.as_deref()
        } else {
            None
        }
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        if name == "jwt" {
            self.jwt_param.as_deref()
        } else {
            None
        }
    }

    fn correlation_id(&self) -> &str {
        "INTEGRATIONTEST"
    }
}

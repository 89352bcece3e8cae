//! HTTP surface: credential endpoint, CORS, ping, health.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use reqwest::{Method, StatusCode, header};
use serde_json::{Value, json};

use common::*;
use turn_rest::config::TrustConfig;
use turn_rest::server::{AppState, MetricsRender, create_combined_router};
use turn_rest::service::TurnRestService;

async fn start(extra: serde_json::Value) -> SocketAddr {
    let config = TrustConfig::from_json(&config_json(&extra)).unwrap();
    let service = Arc::new(TurnRestService::new(config).unwrap());
    spawn_app(create_combined_router(Arc::new(AppState {
        service,
        metrics: None,
    })))
    .await
}

#[tokio::test]
async fn turn_with_bearer_returns_credential() {
    let addr = start(json!({
        "jwtPublicKeys": [K1_PUBLIC.trim()],
        "allowedOrigin": "https://app.example.com",
        "ttl": 600,
    }))
    .await;
    let token = k1_token(&json!({"sub": "alice"}));

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/turn"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ttl"], 600);
    assert_eq!(body["password"].as_str().unwrap().len(), 28);
    let ice = body["iceServers"].as_array().unwrap();
    assert_eq!(ice.len(), 2);
    assert_eq!(ice[0]["urls"][0], "turn:turn.example.com:3478?transport=udp");
    assert_eq!(ice[0]["username"], body["username"]);
    assert_eq!(ice[1]["urls"][0], "stun:turn.example.com:3478");
    assert!(ice[1].get("credential").is_none());
}

#[tokio::test]
async fn turn_subpath_and_query_token_are_accepted() {
    let addr = start(json!({"jwtPublicKeys": [K1_PUBLIC.trim()]})).await;
    let token = k1_token(&json!({"sub": "alice"}));

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/turn/room/42?jwt={token}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_or_untrusted_token_is_unauthorized() {
    let addr = start(json!({"jwtPublicKeys": [K2_PUBLIC.trim()]})).await;
    let client = reqwest::Client::new();

    let missing = client.get(format!("http://{addr}/turn")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(missing.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let untrusted = client
        .get(format!("http://{addr}/turn"))
        .bearer_auth(k1_token(&json!({"sub": "alice"})))
        .send()
        .await
        .unwrap();
    assert_eq!(untrusted.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ignore_jwt_issues_without_token() {
    let addr = start(json!({"ignoreJWT": true})).await;

    let response = reqwest::get(format!("http://{addr}/turn")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let username = body["username"].as_str().unwrap();
    let (_, user) = username.split_once(':').unwrap();
    assert!(user.starts_with("AutoUser-"));
    assert_eq!(user.len(), "AutoUser-".len() + 15);
}

#[tokio::test]
async fn preflight_on_any_path() {
    let addr = start(json!({})).await;
    let client = reqwest::Client::new();

    for path in ["/turn", "/somewhere/else"] {
        let response = client
            .request(Method::OPTIONS, format!("http://{addr}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], "authorization");
    }
}

#[tokio::test]
async fn ping_health_and_not_found() {
    let addr = start(json!({"jwtPublicKeys": [K1_PUBLIC.trim(), K2_PUBLIC.trim()]})).await;

    for path in ["/ping", "/monitor/ping", "/monitor/ping/"] {
        let body = reqwest::get(format!("http://{addr}{path}"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong\n");
    }

    for path in ["/health", "/monitor/healthcheck", "/monitor/healthcheck/"] {
        let health: Value = reqwest::get(format!("http://{addr}{path}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy", "{path}");
        assert_eq!(health["trust"]["staticKeys"], 2);
        assert_eq!(health["trust"]["jwkProviders"], 0);
    }

    for path in ["/metrics", "/monitor/metrics", "/monitor/metrics/"] {
        let metrics = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
        assert_eq!(metrics.status(), StatusCode::NOT_FOUND, "{path}");
    }

    let unknown = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_served_on_both_paths_when_recorder_present() {
    let config = TrustConfig::from_json(&config_json(&json!({}))).unwrap();
    let service = Arc::new(TurnRestService::new(config).unwrap());
    let render: MetricsRender = Arc::new(|| "turn_rest_uptime_ms 42\n".to_string());
    let addr = spawn_app(create_combined_router(Arc::new(AppState {
        service,
        metrics: Some(render),
    })))
    .await;

    for path in ["/metrics", "/monitor/metrics", "/monitor/metrics/"] {
        let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        assert_eq!(response.text().await.unwrap(), "turn_rest_uptime_ms 42\n");
    }
}

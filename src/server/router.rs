//! HTTP routing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Extension, Json, Router,
    extract::{Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::auth::TokenRequest;
use crate::config_reload::ResponseTemplate;
use crate::service::{TurnRequestError, TurnRestService};

/// Renders the metrics exposition text
pub type MetricsRender = Arc<dyn Fn() -> String + Send + Sync>;

/// Shared handler state
pub struct AppState {
    /// Service context
    pub service: Arc<TurnRestService>,
    /// Metrics exposition, when a recorder is installed
    pub metrics: Option<MetricsRender>,
}

/// Per-request id: 15 upper-case alphanumeric characters.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Fresh random id
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        id.truncate(15);
        Self(id)
    }
}

/// Public listener routes: credential issuance and ping.
pub fn create_public_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/turn", get(turn_handler).post(turn_handler).options(preflight_handler))
        .route(
            "/turn/{*rest}",
            get(turn_handler).post(turn_handler).options(preflight_handler),
        )
        .merge(ping_routes())
        .fallback(fallback_handler)
        .layer(middleware::from_fn(track_request))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Admin listener routes: ping, health and metrics.
pub fn create_admin_router(state: Arc<AppState>) -> Router {
    admin_routes()
        .fallback(fallback_handler)
        .layer(middleware::from_fn(track_request))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Public and admin routes on one listener.
pub fn create_combined_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/turn", get(turn_handler).post(turn_handler).options(preflight_handler))
        .route(
            "/turn/{*rest}",
            get(turn_handler).post(turn_handler).options(preflight_handler),
        )
        .merge(admin_routes())
        .fallback(fallback_handler)
        .layer(middleware::from_fn(track_request))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn ping_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(ping_handler).options(preflight_handler))
        .route("/monitor/ping", get(ping_handler).options(preflight_handler))
        .route("/monitor/ping/", get(ping_handler).options(preflight_handler))
}

fn admin_routes() -> Router<Arc<AppState>> {
    ping_routes()
        .route("/health", get(health_handler))
        .route("/monitor/healthcheck", get(health_handler))
        .route("/monitor/healthcheck/", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/monitor/metrics", get(metrics_handler))
        .route("/monitor/metrics/", get(metrics_handler))
}

/// Assigns the correlation id and records request count and latency.
async fn track_request(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let correlation_id = CorrelationId::generate();
    request.extensions_mut().insert(correlation_id);

    telemetry_metrics::counter!("turn_rest_http_requests").increment(1);
    let response = next.run(request).await;
    telemetry_metrics::histogram!("turn_rest_http_requests_latency_seconds")
        .record(started.elapsed().as_secs_f64());
    response
}

/// Borrowed view of an HTTP request for the authenticator.
struct HttpTokenRequest<'a> {
    headers: &'a HeaderMap,
    query: &'a HashMap<String, String>,
    correlation_id: &'a str,
}

impl TokenRequest for HttpTokenRequest<'_> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    fn correlation_id(&self) -> &str {
        self.correlation_id
    }
}

/// GET|POST /turn - authenticate and issue a credential
async fn turn_handler(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    telemetry_metrics::counter!("turn_rest_turn_http_requests").increment(1);
    info!(correlation_id = %correlation_id.0, "Processing TURN credential request");

    let request = HttpTokenRequest {
        headers: &headers,
        query: &query,
        correlation_id: &correlation_id.0,
    };

    match state.service.handle_turn_request(&request).await {
        Ok(issued) => {
            let mut response = Json(&issued.credential).into_response();
            apply_template(response.headers_mut(), &issued.active.template);
            response
        }
        Err(err) => {
            telemetry_metrics::counter!("turn_rest_turn_http_fail").increment(1);
            let status = match &err {
                TurnRequestError::Rejected(_) => StatusCode::UNAUTHORIZED,
                TurnRequestError::Issue(e) => {
                    error!(correlation_id = %correlation_id.0, error = %e, "Credential issuance failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            let template = state.service.live_config().get().template.clone();
            let mut response = status.into_response();
            apply_template(response.headers_mut(), &template);
            response
        }
    }
}

/// OPTIONS on any path - CORS preflight
async fn preflight_handler(State(state): State<Arc<AppState>>) -> Response {
    let template = state.service.live_config().get().template.clone();
    let mut response = StatusCode::OK.into_response();
    apply_template(response.headers_mut(), &template);
    response
}

async fn ping_handler() -> &'static str {
    "pong\n"
}

async fn fallback_handler(State(state): State<Arc<AppState>>, method: Method) -> Response {
    if method == Method::OPTIONS {
        return preflight_handler(State(state)).await;
    }
    telemetry_metrics::counter!("turn_rest_http_unhandled").increment(1);
    StatusCode::NOT_FOUND.into_response()
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.service.trust_store();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "trust": {
            "jwkProviders": store.jwk_provider_urls().len(),
            "staticKeys": store.static_key_ids().len(),
        },
        "validationCache": state.service.cache().stats(),
    }))
}

/// GET /metrics
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(render) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn apply_template(headers: &mut HeaderMap, template: &ResponseTemplate) {
    if let Ok(origin) = HeaderValue::from_str(&template.allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(template.allow_methods),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(template.allow_headers),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(template.cache_control),
    );
}

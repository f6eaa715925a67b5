use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    AUTHORIZATION, CONTENT_TYPE,
};
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse as _, Response};
use readwise_mcp::{AuthGate, AuthOutcome, CredentialCandidates, JsonRpcResponse};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::app::jsonrpc_http_response;

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Query-string fallback for clients that cannot set headers (e.g. EventSource).
pub const API_KEY_QUERY_PARAM: &str = "api_key";

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-API-Key";

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, API_KEY_HEADER])
}

/// Answer every `OPTIONS` request with an empty 200, whatever the path.
///
/// Sits outside [`cors_layer`], so preflights and bare `OPTIONS` alike end here
/// and never reach routing or auth. It sets the allow headers itself.
pub async fn answer_options(request: Request<Body>, next: Next) -> Response {
    if request.method() != Method::OPTIONS {
        return next.run(request).await;
    }
    let mut resp = StatusCode::OK.into_response();
    let headers = resp.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    resp
}

pub async fn require_auth(
    State(gate): State<Arc<AuthGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let candidates = {
        let headers = request.headers();
        let query = request
            .uri()
            .query()
            .and_then(|q| query_param(q, API_KEY_QUERY_PARAM));
        CredentialCandidates::from_raw(
            headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()),
            headers.get(&API_KEY_HEADER).and_then(|h| h.to_str().ok()),
            query.as_deref(),
        )
    };

    match gate.authorize(&candidates) {
        AuthOutcome::Allow => next.run(request).await,
        AuthOutcome::Unauthorized => {
            debug!(path = %request.uri().path(), "rejected request without credential");
            jsonrpc_http_response(StatusCode::UNAUTHORIZED, JsonRpcResponse::unauthorized())
        }
        AuthOutcome::Forbidden => {
            debug!(path = %request.uri().path(), "rejected request with wrong credential");
            jsonrpc_http_response(StatusCode::FORBIDDEN, JsonRpcResponse::forbidden())
        }
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt as _;
use readwise_mcp::{
    AuthGate, JsonRpcId, JsonRpcResponse, McpServer, SERVICE_NAME, StreamEvent, StreamTracker,
    error_codes,
};
use serde_json::{Value, json};
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

use crate::middleware::{answer_options, cors_layer, require_auth};

#[derive(Clone)]
pub struct AppState {
    pub server: McpServer,
    pub gate: Arc<AuthGate>,
    pub streams: StreamTracker,
    pub sse_keepalive: Duration,
    /// Flips to `true` once shutdown starts; open event streams end on it.
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/mcp", post(mcp_post))
        .route("/sse", get(sse_get))
        .layer(axum::middleware::from_fn_with_state(
            state.gate.clone(),
            require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(gated)
        .fallback(not_found)
        .layer(cors_layer())
        .layer(axum::middleware::from_fn(answer_options))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                // Never include request headers or bodies in spans (credentials travel there).
                let span = tracing::info_span!(
                    "http.request",
                    http_method = %req.method(),
                    http_path = %req.uri().path(),
                );
                let cx = readwise_otel::extract_trace_context(req.headers());
                let _ = span.set_parent(cx);
                span
            }),
        )
        .with_state(state)
}

pub async fn serve_tcp(
    addr: SocketAddr,
    state: AppState,
    shutdown: watch::Sender<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    let local = listener.local_addr().context("local addr")?;
    info!(addr = %local, "readwise-mcp-server listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends every open /sse stream so the drain can finish.
            let _ = shutdown.send(true);
        })
        .await
        .context("serve tcp")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn mcp_post(State(state): State<AppState>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return jsonrpc_response(JsonRpcResponse::invalid_request(
                JsonRpcId::Null,
                Some(format!("body is not valid JSON: {e}")),
            ));
        }
    };
    jsonrpc_response(state.server.handle(raw).await)
}

async fn sse_get(State(state): State<AppState>) -> impl IntoResponse {
    let stream = state.streams.open(state.sse_keepalive);
    let stream_id = stream.id();
    let mut shutdown = state.shutdown.clone();

    let events = stream
        .map(move |ev| Ok::<_, Infallible>(sse_event(ev, stream_id)))
        .take_until(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(events),
    )
}

fn sse_event(ev: StreamEvent, stream_id: u64) -> Event {
    match ev {
        StreamEvent::Connected => Event::default()
            .event("connected")
            .data(json!({ "type": "connected", "stream": stream_id }).to_string()),
        StreamEvent::KeepAlive => Event::default().comment("keepalive"),
    }
}

/// HTTP status for a JSON-RPC response. Only envelope and auth failures leave 200.
pub fn status_for(resp: &JsonRpcResponse) -> StatusCode {
    match resp.error().map(|e| e.code) {
        Some(error_codes::INVALID_REQUEST) => StatusCode::BAD_REQUEST,
        Some(error_codes::UNAUTHORIZED) => StatusCode::UNAUTHORIZED,
        Some(error_codes::FORBIDDEN) => StatusCode::FORBIDDEN,
        _ => StatusCode::OK,
    }
}

fn jsonrpc_response(resp: JsonRpcResponse) -> Response {
    jsonrpc_http_response(status_for(&resp), resp)
}

pub fn jsonrpc_http_response(status: StatusCode, resp: JsonRpcResponse) -> Response {
    (status, Json(resp)).into_response()
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %msg, "handler panicked");
    jsonrpc_http_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        JsonRpcResponse::internal_error(JsonRpcId::Null, msg),
    )
}

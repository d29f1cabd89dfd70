//! HTTP front end
//!
//! Routes:
//! - `GET /` landing page with the embedded stream
//! - `GET /stream.mjpg` the live MJPEG stream
//! - `GET /health` liveness probe
//! - `GET /api/stats` streaming counters

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::capture::CaptureSource;
use crate::config::ServerConfig;
use crate::lifecycle::TeardownGuard;
use crate::stream::{multipart, FrameStats, Multiplexer, StreamError, StreamStats};

/// Path of the MJPEG stream
pub const STREAM_PATH: &str = "/stream.mjpg";

/// Built-in page used when the template file cannot be read
const FALLBACK_PAGE: &str = include_str!("../templates/index.html");

/// Web server state
#[derive(Clone)]
pub struct AppState {
    multiplexer: Arc<Multiplexer>,
    source: Arc<CaptureSource>,
    template: PathBuf,
    title: String,
    request_timeout: Duration,
    drain_timeout: Duration,
}

impl AppState {
    pub fn new(
        server: &ServerConfig,
        multiplexer: Arc<Multiplexer>,
        source: Arc<CaptureSource>,
    ) -> Self {
        Self {
            multiplexer,
            source,
            template: server.template.clone(),
            title: server.title.clone(),
            request_timeout: server.request_timeout(),
            drain_timeout: server.drain_timeout(),
        }
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }
}

/// Builds the application router
pub fn router(state: AppState) -> Router {
    let page = get(index_handler).layer(TimeoutLayer::new(state.request_timeout));

    Router::new()
        .route("/", page)
        .route(STREAM_PATH, get(stream_handler))
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .fallback(not_found_handler)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serves HTTP until `shutdown` resolves.
///
/// On shutdown the stream is stopped so open `/stream.mjpg` responses end,
/// in-flight connections drain, and `teardown` runs. Once the stream has
/// stopped, connections get the configured drain timeout to finish; a client
/// that stopped reading is dropped after it. `teardown` runs exactly once,
/// even if serving fails.
pub async fn serve<S, T>(
    listener: TcpListener,
    state: AppState,
    shutdown: S,
    teardown: T,
) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
    T: FnOnce() + Send,
{
    let mut teardown = TeardownGuard::new("capture release", teardown);

    let multiplexer = Arc::clone(&state.multiplexer);
    let stream = Arc::clone(&state.multiplexer);
    let drain_timeout = state.drain_timeout;
    let app = router(state);

    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on http://{}", addr);
    }

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        multiplexer.shutdown();
        info!("Draining connections");
    })
    .into_future();

    let drain_deadline = async {
        stream.stopped().await;
        tokio::time::sleep(drain_timeout).await;
    };

    let result = tokio::select! {
        result = server => result,
        _ = drain_deadline => {
            warn!(
                timeout_ms = drain_timeout.as_millis() as u64,
                viewers = stream.stats().active_sessions,
                "Connections still open after drain timeout, dropping them"
            );
            Ok(())
        }
    };

    info!("HTTP server stopped");
    teardown.run();

    result
}

/// Index page handler
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    match tokio::fs::read_to_string(&state.template).await {
        Ok(template) => Html(render_page(&template, &state.title)),
        Err(e) => {
            warn!(
                path = %state.template.display(),
                error = %e,
                "Failed to load page template, serving built-in page"
            );
            Html(render_page(FALLBACK_PAGE, &state.title))
        }
    }
}

fn render_page(template: &str, title: &str) -> String {
    template
        .replace("{{stream_url}}", STREAM_PATH)
        .replace("{{title}}", &escape_html(title))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// MJPEG stream handler
async fn stream_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, StreamError> {
    let session = state
        .multiplexer
        .open_session(peer.map(|ConnectInfo(addr)| addr))?;

    let headers = [
        (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache, private"),
        (header::PRAGMA, "no-cache"),
    ];

    Ok((headers, Body::from_stream(session.into_body_stream())).into_response())
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    streaming: bool,
    device_open: bool,
    viewers: usize,
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let streaming = state.multiplexer.is_running();
    let device_open = state.source.stats().is_open;

    Json(HealthResponse {
        status: if streaming && device_open { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        streaming,
        device_open,
        viewers: state.multiplexer.stats().active_sessions,
    })
}

/// Stats API response
#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stream: StreamStats,
    encode_failure_rate: f64,
    distribution: FrameStats,
}

/// Stats API handler
async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stream = state.multiplexer.stats();

    Json(StatsResponse {
        encode_failure_rate: stream.encode_failure_rate(),
        distribution: state.multiplexer.distribution_stats(),
        stream,
    })
}

async fn not_found_handler() -> (StatusCode, Html<&'static str>) {
    (
        StatusCode::NOT_FOUND,
        Html(
            r#"<!DOCTYPE html>
<html>
<head><title>404 Not Found</title></head>
<body>
    <h1>404 - Page Not Found</h1>
    <p><a href="/">Go to Home</a></p>
</body>
</html>"#,
        ),
    )
}

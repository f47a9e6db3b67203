//! HTTP proxy server
//!
//! Hosts the messages endpoint plus a generic passthrough fallback for
//! every other upstream path. Forwarding is transparent: headers are
//! cloned minus hop-by-hop headers and `host`, the credential header is
//! substituted, and response bytes are relayed as-is.

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Response, StatusCode},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::capture::CaptureDispatcher;
use crate::config::Config;
use crate::error::{Result, ScribeError};
use serde_json::Value;

use super::error::ProxyError;
use super::messages::messages_handler;

/// Hop-by-hop headers that should not be forwarded to upstream
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "proxy-connection",
    "te",
    "upgrade",
];

/// Caller credential headers, always replaced with the proxy's own key
const CREDENTIAL_HEADERS: &[&str] = &["x-api-key", "authorization"];

/// Derives a user identifier from the inbound request body
pub type UserIdResolver = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Full configuration (read-only)
    pub config: Config,
    /// HTTP client for upstream requests
    pub client: reqwest::Client,
    /// Capture dispatcher, shared across requests
    pub dispatcher: Arc<CaptureDispatcher>,
    /// Optional override for user-id resolution
    pub user_resolver: Option<UserIdResolver>,
}

impl AppState {
    /// Resolve the caller-supplied user id for a request body.
    ///
    /// Uses the injected resolver when one was provided, else reads
    /// `metadata.user_id` from the body.
    pub fn resolve_user_id(&self, request: &Value) -> Option<String> {
        match &self.user_resolver {
            Some(resolver) => resolver(request),
            None => request
                .get("metadata")?
                .get("user_id")?
                .as_str()
                .map(str::to_string),
        }
    }
}

/// The main proxy server
pub struct ProxyServer {
    config: Config,
    dispatcher: Arc<CaptureDispatcher>,
    user_resolver: Option<UserIdResolver>,
}

impl ProxyServer {
    /// Create a new proxy server with the given configuration and dispatcher
    pub fn new(config: Config, dispatcher: Arc<CaptureDispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            user_resolver: None,
        }
    }

    /// Inject a custom user-id resolver
    pub fn with_user_resolver(mut self, resolver: UserIdResolver) -> Self {
        self.user_resolver = Some(resolver);
        self
    }

    /// Start the proxy server and listen for requests
    pub async fn serve(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.proxy.timeout_secs))
            .build()
            .map_err(|e| ScribeError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        let app_state = Arc::new(AppState {
            config: self.config.clone(),
            client,
            dispatcher: self.dispatcher.clone(),
            user_resolver: self.user_resolver.clone(),
        });

        let app = create_router(app_state);

        let addr: SocketAddr = self
            .config
            .proxy
            .listen_addr
            .parse()
            .map_err(|e| ScribeError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting proxy server on {addr}");
        tracing::info!("Forwarding to upstream: {}", self.config.proxy.upstream_url);
        if self.dispatcher.is_active() {
            tracing::info!("Conversation capture enabled");
        } else {
            tracing::info!("Conversation capture disabled");
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ScribeError::Upstream(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ScribeError::Upstream(format!("Server error: {e}")))?;

        tracing::info!("Proxy server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/messages", post(messages_handler))
        .fallback(passthrough_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Generic passthrough for any other upstream endpoint.
///
/// Relays the request to the upstream base URL joined with the original
/// path and query. No capture happens here.
async fn passthrough_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response<Body> {
    let Some(api_key) = state.config.proxy.resolve_api_key() else {
        return ProxyError::Credential(state.config.proxy.api_key_env.clone()).into_response();
    };

    let base_url = match Url::parse(&state.config.proxy.upstream_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("Invalid configured upstream URL: {e}");
            return ProxyError::Request(format!("Invalid upstream URL: {e}")).into_response();
        }
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let target_url = match base_url.join(path_and_query) {
        Ok(url) => url,
        Err(e) => {
            return ProxyError::Request(format!("Invalid request path: {e}")).into_response();
        }
    };

    let method = request.method().clone();
    let headers = request.headers().clone();
    let body_bytes = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ProxyError::Request(format!("Failed to read request body: {e}"))
                .into_response();
        }
    };

    let reqwest_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            return ProxyError::Request(format!("Invalid HTTP method: {method}")).into_response();
        }
    };

    tracing::debug!("Relaying {method} {target_url}");

    let response = match state
        .client
        .request(reqwest_method, target_url)
        .headers(forward_request_headers(&headers, &api_key))
        .body(body_bytes)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return ProxyError::Network(e.to_string()).into_response(),
    };

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let response_headers = filter_response_headers(response.headers());

    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .unwrap_or_else(|e| ProxyError::Request(format!("Failed to build response: {e}")).into_response())
}

/// Clone caller headers for the upstream request: hop-by-hop headers and
/// `host` are stripped, the credential header is substituted.
pub(crate) fn forward_request_headers(
    headers: &HeaderMap,
    api_key: &str,
) -> reqwest::header::HeaderMap {
    let mut forwarded = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&name_str.as_str())
            || CREDENTIAL_HEADERS.contains(&name_str.as_str())
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            forwarded.insert(name, value);
        }
    }

    if let Ok(value) = reqwest::header::HeaderValue::from_str(api_key) {
        forwarded.insert("x-api-key", value);
    }

    forwarded
}

/// Copy upstream response headers for the caller, minus hop-by-hop headers
pub(crate) fn filter_response_headers(headers: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&name_str.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            axum::http::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            axum::http::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            filtered.insert(name, value);
        }
    }
    filtered
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

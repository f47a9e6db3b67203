//! The messages endpoint
//!
//! Forwards the inbound request to the upstream message API byte-for-byte
//! and returns whatever comes back, streamed or whole. Capture rides along
//! on the side: the body is parsed best-effort (never affecting the
//! forwarded bytes), packaged into a [`CapturePayload`] and handed to the
//! dispatcher without being awaited.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Response, StatusCode};
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use crate::capture::{CapturePayload, CapturedResponse, flatten_content};
use crate::proxy::error::ProxyError;
use crate::proxy::server::{AppState, filter_response_headers, forward_request_headers};
use crate::proxy::streaming::{CaptureStream, StreamCaptureContext};

/// Correlation header carrying the conversation id back to the caller
pub const CONVERSATION_ID_HEADER: &str = "x-scribe-conversation-id";
/// Measured end-to-end proxy latency, set on non-streaming responses
pub const LATENCY_MS_HEADER: &str = "x-scribe-latency-ms";

/// POST /v1/messages
pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let started = Instant::now();
    let conversation_id = Uuid::new_v4().to_string();

    // Best-effort view of the request, used for capture only - the raw
    // bytes are what gets forwarded.
    let request_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let model = request_json
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown")
        .to_string();
    let messages: Vec<Value> = request_json
        .get("messages")
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();
    let user_id = state.resolve_user_id(&request_json);

    let Some(api_key) = state.config.proxy.resolve_api_key() else {
        return ProxyError::Credential(state.config.proxy.api_key_env.clone()).into_response();
    };

    let url = format!(
        "{}/v1/messages",
        state.config.proxy.upstream_url.trim_end_matches('/')
    );

    let upstream = match state
        .client
        .post(&url)
        .headers(forward_request_headers(&headers, &api_key))
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return ProxyError::Network(e.to_string()).into_response(),
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let is_event_stream = upstream
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false);

    if is_event_stream {
        streamed_response(
            &state,
            upstream,
            status,
            conversation_id,
            user_id,
            model,
            messages,
            started,
        )
    } else {
        buffered_response(
            &state,
            upstream,
            status,
            conversation_id,
            user_id,
            model,
            messages,
            started,
        )
        .await
    }
}

/// Pass an upstream event stream through, teeing it into the parser.
#[allow(clippy::too_many_arguments)]
fn streamed_response(
    state: &AppState,
    upstream: reqwest::Response,
    status: StatusCode,
    conversation_id: String,
    user_id: Option<String>,
    model: String,
    messages: Vec<Value>,
    started: Instant,
) -> Response<Body> {
    // Non-success exchanges are not captured, only relayed
    let body = if status.is_success() {
        let ctx = StreamCaptureContext {
            dispatcher: state.dispatcher.clone(),
            conversation_id: conversation_id.clone(),
            user_id,
            model,
            messages,
            started,
        };
        Body::from_stream(CaptureStream::new(upstream.bytes_stream().boxed(), ctx))
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    Response::builder()
        .status(status)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .header(CONVERSATION_ID_HEADER, &conversation_id)
        .body(body)
        .unwrap_or_else(|e| ProxyError::Request(format!("Failed to build response: {e}")).into_response())
}

/// Await the whole upstream body, capture alongside, return it verbatim.
#[allow(clippy::too_many_arguments)]
async fn buffered_response(
    state: &AppState,
    upstream: reqwest::Response,
    status: StatusCode,
    conversation_id: String,
    user_id: Option<String>,
    model: String,
    messages: Vec<Value>,
    started: Instant,
) -> Response<Body> {
    let upstream_headers = upstream.headers().clone();
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ProxyError::Network(format!("Failed to read upstream body: {e}"))
                .into_response();
        }
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    if status.is_success() {
        let payload = CapturePayload {
            conversation_id: conversation_id.clone(),
            user_id,
            model,
            messages,
            response: parse_message_response(&bytes),
            latency_ms,
            ttft_ms: None,
            streamed: false,
            captured_at: Utc::now(),
        };
        state.dispatcher.dispatch(payload);
    }

    let response_headers = filter_response_headers(&upstream_headers);
    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }

    builder
        .header(CONVERSATION_ID_HEADER, &conversation_id)
        .header(LATENCY_MS_HEADER, latency_ms.to_string())
        .body(Body::from(bytes))
        .unwrap_or_else(|e| ProxyError::Request(format!("Failed to build response: {e}")).into_response())
}

/// Best-effort parse of a whole (non-streaming) message response body.
///
/// Returns `None` when the body is not the expected shape; the caller
/// still dispatches the payload so the user turn is recorded.
pub fn parse_message_response(bytes: &[u8]) -> Option<CapturedResponse> {
    let json: Value = serde_json::from_slice(bytes).ok()?;
    let content = flatten_content(json.get("content")?);
    let stop_reason = json
        .get("stop_reason")
        .and_then(|s| s.as_str())
        .map(str::to_string);
    let usage = json
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok());

    Some(CapturedResponse {
        content,
        stop_reason,
        usage,
    })
}

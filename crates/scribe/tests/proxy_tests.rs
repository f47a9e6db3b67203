//! Integration tests for the proxy request path
//!
//! A wiremock server stands in for the upstream message API; responses are
//! checked byte-for-byte against what the mock served, and capture is
//! observed through an in-memory queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scribe::capture::{CaptureDispatcher, CapturePayload};
use scribe::config::{Config, ProxyConfig};
use scribe::proxy::{AppState, CONVERSATION_ID_HEADER, LATENCY_MS_HEADER, create_router};
use scribe::queue::{MemoryQueue, QueueClient};
use scribe::store::RestStore;

// =============================================================================
// Test Fixtures
// =============================================================================

fn app_state(upstream_url: &str, dispatcher: CaptureDispatcher) -> Arc<AppState> {
    let config = Config {
        proxy: ProxyConfig {
            upstream_url: upstream_url.to_string(),
            api_key: Some("proxy-key".to_string()),
            ..ProxyConfig::default()
        },
        ..Config::default()
    };

    Arc::new(AppState {
        config,
        client: reqwest::Client::new(),
        dispatcher: Arc::new(dispatcher),
        user_resolver: None,
    })
}

fn messages_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("anthropic-version", "2023-06-01")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn response_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn dispatched_payload(queue: &MemoryQueue) -> CapturePayload {
    for _ in 0..200 {
        if let Some(item) = queue.pop().await.unwrap() {
            return serde_json::from_str(&item).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no capture payload was dispatched");
}

fn sse_body() -> String {
    concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":5,\"output_tokens\":0}}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n",
        "\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n",
        "\n",
    )
    .to_string()
}

// =============================================================================
// Non-Streaming Passthrough
// =============================================================================

mod non_streaming_tests {
    use super::*;

    #[tokio::test]
    async fn test_body_returned_byte_identical_with_capture_enabled() {
        let upstream = MockServer::start().await;
        let upstream_body = serde_json::json!({
            "id": "msg_1",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        });
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&upstream_body))
            .mount(&upstream)
            .await;

        let queue = Arc::new(MemoryQueue::new());
        let app = create_router(app_state(
            &upstream.uri(),
            CaptureDispatcher::new(true, Some(queue.clone() as Arc<dyn QueueClient>), None),
        ));

        let request = serde_json::json!({
            "model": "m1",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hello"}]
        });
        let response = app.oneshot(messages_request(request)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CONVERSATION_ID_HEADER));
        assert!(response.headers().contains_key(LATENCY_MS_HEADER));

        let body = response_bytes(response).await;
        let returned: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(returned, upstream_body);

        // The concrete scenario: payload carries the parsed response
        let payload = dispatched_payload(&queue).await;
        assert_eq!(payload.model, "m1");
        assert!(!payload.streamed);
        let captured = payload.response.unwrap();
        assert_eq!(captured.content, "hi there");
        assert_eq!(captured.stop_reason, Some("end_turn".to_string()));
        assert_eq!(captured.usage.unwrap().output_tokens, Some(2));
    }

    #[tokio::test]
    async fn test_body_identical_with_capture_disabled() {
        let upstream = MockServer::start().await;
        let upstream_body = serde_json::json!({
            "content": [{"type": "text", "text": "hi"}]
        });
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&upstream_body))
            .mount(&upstream)
            .await;

        let app = create_router(app_state(&upstream.uri(), CaptureDispatcher::disabled()));

        let response = app
            .oneshot(messages_request(serde_json::json!({
                "model": "m1",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_bytes(response).await;
        let returned: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(returned, upstream_body);
    }

    #[tokio::test]
    async fn test_request_forwarded_verbatim_with_substituted_credential() {
        let upstream = MockServer::start().await;
        let request_body = serde_json::json!({
            "model": "m1",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hello"}]
        });
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_json(&request_body))
            .and(header("x-api-key", "proxy-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "ok"}]
            })))
            .expect(1)
            .mount(&upstream)
            .await;

        let app = create_router(app_state(&upstream.uri(), CaptureDispatcher::disabled()));
        let response = app.oneshot(messages_request(request_body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_correlation_header_is_a_uuid() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "ok"}]
            })))
            .mount(&upstream)
            .await;

        let app = create_router(app_state(&upstream.uri(), CaptureDispatcher::disabled()));
        let response = app
            .oneshot(messages_request(serde_json::json!({
                "model": "m1",
                "messages": []
            })))
            .await
            .unwrap();

        let header_value = response
            .headers()
            .get(CONVERSATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(uuid::Uuid::parse_str(&header_value).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_request_body_still_forwarded() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({
                    "error": {"type": "invalid_request_error", "message": "bad json"}
                })),
            )
            .mount(&upstream)
            .await;

        let queue = Arc::new(MemoryQueue::new());
        let app = create_router(app_state(
            &upstream.uri(),
            CaptureDispatcher::new(true, Some(queue.clone() as Arc<dyn QueueClient>), None),
        ));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/messages")
                    .body(Body::from("{not valid json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Upstream's own rejection passes through as-is
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Non-success exchanges are not captured
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upstream_error_status_passed_through() {
        let upstream = MockServer::start().await;
        let error_body = serde_json::json!({
            "error": {"type": "overloaded_error", "message": "try later"}
        });
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(&error_body))
            .mount(&upstream)
            .await;

        let app = create_router(app_state(&upstream.uri(), CaptureDispatcher::disabled()));
        let response = app
            .oneshot(messages_request(serde_json::json!({
                "model": "m1",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 529);
        let body = response_bytes(response).await;
        let returned: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(returned, error_body);
    }

    #[tokio::test]
    async fn test_connection_failure_yields_proxy_error_envelope() {
        // Nothing is listening on this port
        let app = create_router(app_state("http://127.0.0.1:1", CaptureDispatcher::disabled()));

        let response = app
            .oneshot(messages_request(serde_json::json!({
                "model": "m1",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "proxy_error");
    }
}

// =============================================================================
// Streaming Passthrough
// =============================================================================

mod streaming_tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_bytes_identical_and_payload_flushed() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"),
            )
            .mount(&upstream)
            .await;

        let queue = Arc::new(MemoryQueue::new());
        let app = create_router(app_state(
            &upstream.uri(),
            CaptureDispatcher::new(true, Some(queue.clone() as Arc<dyn QueueClient>), None),
        ));

        let response = app
            .oneshot(messages_request(serde_json::json!({
                "model": "m1",
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
        assert!(response.headers().contains_key(CONVERSATION_ID_HEADER));

        let body = response_bytes(response).await;
        assert_eq!(String::from_utf8(body).unwrap(), sse_body());

        // The concrete scenario: accumulated content and final usage
        let payload = dispatched_payload(&queue).await;
        assert!(payload.streamed);
        assert!(payload.ttft_ms.is_some());
        let captured = payload.response.unwrap();
        assert_eq!(captured.content, "Hello");
        assert_eq!(captured.stop_reason, Some("end_turn".to_string()));
        let usage = captured.usage.unwrap();
        assert_eq!(usage.input_tokens, Some(5));
        assert_eq!(usage.output_tokens, Some(2));
    }

    #[tokio::test]
    async fn test_stream_identical_when_capture_disabled() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"),
            )
            .mount(&upstream)
            .await;

        let app = create_router(app_state(&upstream.uri(), CaptureDispatcher::disabled()));
        let response = app
            .oneshot(messages_request(serde_json::json!({
                "model": "m1",
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .await
            .unwrap();

        let body = response_bytes(response).await;
        assert_eq!(String::from_utf8(body).unwrap(), sse_body());
    }
}

// =============================================================================
// Fire-and-Forget Capture
// =============================================================================

mod capture_latency_tests {
    use super::*;

    #[tokio::test]
    async fn test_response_does_not_wait_for_capture() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hi"}],
                "usage": {"input_tokens": 1, "output_tokens": 1}
            })))
            .mount(&upstream)
            .await;

        // Direct-write capture against a store that answers slowly
        let store_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201).set_delay(Duration::from_millis(500)),
            )
            .mount(&store_server)
            .await;

        let store = Arc::new(RestStore::new(
            reqwest::Client::new(),
            store_server.uri(),
            "store-key",
        ));
        let app = create_router(app_state(
            &upstream.uri(),
            CaptureDispatcher::new(true, None, Some(store)),
        ));

        let started = Instant::now();
        let response = app
            .oneshot(messages_request(serde_json::json!({
                "model": "m1",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.status(), StatusCode::OK);
        // The handler must not have awaited the 500ms store write
        assert!(
            elapsed < Duration::from_millis(400),
            "request path waited on capture: {elapsed:?}"
        );

        // The capture still lands in the background
        for _ in 0..300 {
            let received = store_server.received_requests().await.unwrap();
            if received.len() >= 3 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("capture never reached the store");
    }
}

// =============================================================================
// Generic Passthrough
// =============================================================================

mod passthrough_tests {
    use super::*;

    #[tokio::test]
    async fn test_other_paths_relayed_without_capture() {
        let upstream = MockServer::start().await;
        let models_body = serde_json::json!({"data": [{"id": "m1"}]});
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("x-api-key", "proxy-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&models_body))
            .expect(1)
            .mount(&upstream)
            .await;

        let queue = Arc::new(MemoryQueue::new());
        let app = create_router(app_state(
            &upstream.uri(),
            CaptureDispatcher::new(true, Some(queue.clone() as Arc<dyn QueueClient>), None),
        ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .header("x-api-key", "caller-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_bytes(response).await;
        let returned: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(returned, models_body);

        // No capture on the generic path
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_string_preserved() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(wiremock::matchers::query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&upstream)
            .await;

        let app = create_router(app_state(&upstream.uri(), CaptureDispatcher::disabled()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upstream_error_relayed_as_is() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&upstream)
            .await;

        let app = create_router(app_state(&upstream.uri(), CaptureDispatcher::disabled()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response_bytes(response).await, b"forbidden");
    }
}

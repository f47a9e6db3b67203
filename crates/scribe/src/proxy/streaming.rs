//! Streaming passthrough with inline capture
//!
//! Wraps the upstream byte stream so that every chunk is yielded to the
//! caller unchanged and in order, while the same bytes update the SSE
//! parser state between polls. The parser update is synchronous, O(chunk)
//! and infallible, so the caller-visible stream never depends on parsing
//! succeeding and no backpressure is introduced.
//!
//! On stream completion the accumulated state is packaged into a
//! [`CapturePayload`] and dispatched. If the caller disconnects mid-stream
//! the wrapper is dropped without completing; `Drop` dispatches whatever
//! content accumulated up to that point as a shorter record. The capture
//! context is taken out on whichever path runs first, so dispatch fires
//! exactly once.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use futures::stream::Stream;
use serde_json::Value;

use crate::capture::{CaptureDispatcher, CapturePayload, CapturedResponse};
use crate::proxy::sse::SseParser;

/// Request-side data needed to assemble the payload once the stream ends
pub struct StreamCaptureContext {
    pub dispatcher: Arc<CaptureDispatcher>,
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub messages: Vec<Value>,
    /// Request start, for total latency and time-to-first-token
    pub started: Instant,
}

/// Pass-through transform over an upstream byte stream
pub struct CaptureStream<S> {
    inner: S,
    parser: SseParser,
    ctx: Option<StreamCaptureContext>,
    started: Instant,
    ttft_ms: Option<u64>,
}

impl<S> CaptureStream<S> {
    pub fn new(inner: S, ctx: StreamCaptureContext) -> Self {
        let started = ctx.started;
        Self {
            inner,
            parser: SseParser::new(),
            ctx: Some(ctx),
            started,
            ttft_ms: None,
        }
    }

    /// Package the parse state and dispatch it. Idempotent: the context is
    /// consumed on the first call, so the completion path and `Drop` never
    /// both fire.
    fn finalize(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };

        let summary = std::mem::take(&mut self.parser).finish();
        let payload = CapturePayload {
            conversation_id: ctx.conversation_id,
            user_id: ctx.user_id,
            model: ctx.model,
            messages: ctx.messages,
            response: Some(CapturedResponse {
                content: summary.content,
                stop_reason: summary.stop_reason,
                usage: summary.usage,
            }),
            latency_ms: ctx.started.elapsed().as_millis() as u64,
            ttft_ms: self.ttft_ms,
            streamed: true,
            captured_at: Utc::now(),
        };

        ctx.dispatcher.dispatch(payload);
    }
}

impl<S, E> Stream for CaptureStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                if this.ttft_ms.is_none() {
                    this.ttft_ms = Some(this.started.elapsed().as_millis() as u64);
                }
                // Infallible, non-blocking state update; the chunk goes out
                // unchanged regardless of what the parser makes of it.
                this.parser.feed(&bytes);
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for CaptureStream<S> {
    fn drop(&mut self) {
        // Caller disconnected (or the stream errored out) before the end:
        // capture whatever accumulated as a partial record.
        self.finalize();
    }
}

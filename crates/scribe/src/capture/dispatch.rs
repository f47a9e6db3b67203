//! Fire-and-forget capture dispatch
//!
//! Delivery runs on a spawned background task so the request path never
//! waits on it and never observes its outcome. Preference order: push to
//! the ephemeral queue when one is configured (fast path), else write
//! directly to the durable store, else do nothing - capture disabled
//! entirely is a valid production configuration.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capture::CapturePayload;
use crate::queue::QueueClient;
use crate::store::RestStore;

/// Hands completed payloads to the telemetry pipeline
pub struct CaptureDispatcher {
    enabled: bool,
    queue: Option<Arc<dyn QueueClient>>,
    store: Option<Arc<RestStore>>,
}

impl CaptureDispatcher {
    pub fn new(
        enabled: bool,
        queue: Option<Arc<dyn QueueClient>>,
        store: Option<Arc<RestStore>>,
    ) -> Self {
        Self {
            enabled,
            queue,
            store,
        }
    }

    /// A dispatcher that drops everything (capture disabled)
    pub fn disabled() -> Self {
        Self::new(false, None, None)
    }

    /// Whether dispatch would do anything at all
    pub fn is_active(&self) -> bool {
        self.enabled && (self.queue.is_some() || self.store.is_some())
    }

    /// Hand off a payload without blocking or returning a result.
    ///
    /// Every failure inside the spawned task is caught and logged; nothing
    /// propagates back to the request path.
    pub fn dispatch(&self, payload: CapturePayload) {
        if !self.is_active() {
            return;
        }

        // Dispatch can fire from a stream Drop during shutdown, when no
        // runtime may be left to spawn onto.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Capture dispatch skipped: no async runtime available");
            return;
        };

        let queue = self.queue.clone();
        let store = self.store.clone();

        handle.spawn(async move {
            let conversation_id = payload.conversation_id.clone();

            if let Some(queue) = queue {
                match serde_json::to_string(&payload) {
                    Ok(item) => match queue.push(item).await {
                        Ok(()) => {
                            debug!(conversation_id = %conversation_id, "Capture payload enqueued")
                        }
                        Err(e) => warn!(
                            conversation_id = %conversation_id,
                            "Failed to enqueue capture payload: {e}"
                        ),
                    },
                    Err(e) => warn!(
                        conversation_id = %conversation_id,
                        "Failed to serialize capture payload: {e}"
                    ),
                }
            } else if let Some(store) = store {
                match store.persist_payload(&payload).await {
                    Ok(()) => {
                        debug!(conversation_id = %conversation_id, "Capture payload persisted")
                    }
                    Err(e) => warn!(
                        conversation_id = %conversation_id,
                        "Failed to persist capture payload: {e}"
                    ),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn payload() -> CapturePayload {
        CapturePayload {
            conversation_id: "conv-1".to_string(),
            user_id: None,
            model: "m1".to_string(),
            messages: vec![json!({"role": "user", "content": "hello"})],
            response: None,
            latency_ms: 10,
            ttft_ms: None,
            streamed: false,
            captured_at: Utc::now(),
        }
    }

    async fn wait_for_depth(queue: &MemoryQueue, expected: u64) {
        for _ in 0..100 {
            if queue.depth().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never reached depth {expected}");
    }

    #[tokio::test]
    async fn test_dispatch_pushes_to_queue() {
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = CaptureDispatcher::new(true, Some(queue.clone() as Arc<dyn QueueClient>), None);

        dispatcher.dispatch(payload());
        wait_for_depth(&queue, 1).await;

        let item = queue.pop().await.unwrap().unwrap();
        let back: CapturePayload = serde_json::from_str(&item).unwrap();
        assert_eq!(back.conversation_id, "conv-1");
    }

    #[tokio::test]
    async fn test_dispatch_disabled_is_noop() {
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = CaptureDispatcher::new(false, Some(queue.clone() as Arc<dyn QueueClient>), None);

        dispatcher.dispatch(payload());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_unconfigured_is_noop() {
        let dispatcher = CaptureDispatcher::new(true, None, None);
        assert!(!dispatcher.is_active());

        // Must not panic or spawn anything
        dispatcher.dispatch(payload());
    }
}

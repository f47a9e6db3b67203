//! Queue consumer batch job
//!
//! Drains the ephemeral queue into the durable store. Invoked by an
//! external scheduler (`scribe consume`); the report tells the scheduler
//! whether an immediate re-invocation is worthwhile.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::capture::CapturePayload;
use crate::error::Result;
use crate::queue::QueueClient;
use crate::store::RestStore;

/// Outcome of one consume batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    /// Items persisted successfully
    pub processed: u64,
    /// Items dropped after a deserialization or persistence failure
    pub failed: u64,
    /// Queue depth remaining after the batch
    pub remaining: u64,
}

/// Drains queued capture payloads into the durable store
pub struct QueueConsumer {
    queue: Arc<dyn QueueClient>,
    store: Arc<RestStore>,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn QueueClient>, store: Arc<RestStore>) -> Self {
        Self { queue, store }
    }

    /// Drain up to `batch_size` items, persisting each independently.
    ///
    /// Items are popped one at a time, never as a bulk range, so a crash
    /// mid-batch loses at most the item in flight. A bad item increments
    /// the failure count and the loop moves on; once popped, a failed item
    /// is not re-queued.
    pub async fn consume(&self, batch_size: usize) -> Result<ConsumeReport> {
        let mut processed = 0u64;
        let mut failed = 0u64;

        for _ in 0..batch_size {
            let Some(raw) = self.queue.pop().await? else {
                break;
            };

            match serde_json::from_str::<CapturePayload>(&raw) {
                Ok(payload) => match self.store.persist_payload(&payload).await {
                    Ok(()) => processed += 1,
                    Err(e) => {
                        failed += 1;
                        warn!(
                            conversation_id = %payload.conversation_id,
                            "Failed to persist queued payload: {e}"
                        );
                    }
                },
                Err(e) => {
                    failed += 1;
                    warn!("Dropping malformed queue item: {e}");
                }
            }
        }

        let remaining = self.queue.depth().await.unwrap_or(0);

        Ok(ConsumeReport {
            processed,
            failed,
            remaining,
        })
    }
}

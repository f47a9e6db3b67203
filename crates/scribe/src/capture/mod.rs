//! Conversation capture pipeline
//!
//! The proxy hands a [`CapturePayload`] to the [`CaptureDispatcher`] on
//! request completion (fire-and-forget); the [`QueueConsumer`] later drains
//! enqueued payloads into the durable store.

mod consumer;
mod dispatch;
mod payload;

pub use consumer::{ConsumeReport, QueueConsumer};
pub use dispatch::CaptureDispatcher;
pub use payload::{
    CapturePayload, CapturedResponse, ConversationRecord, TokenUsage, TurnRecord,
    flatten_content, flatten_user_content,
};

//! Capture data model
//!
//! [`CapturePayload`] is the transient unit handed from the proxy to the
//! dispatcher. It has no identity beyond the conversation id it carries;
//! on persistence it collapses into exactly one [`ConversationRecord`] and
//! up to two [`TurnRecord`]s (user + assistant).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of the user turn
pub const ROLE_USER: &str = "user";
/// Role of the assistant turn
pub const ROLE_ASSISTANT: &str = "assistant";

/// Token usage counters as reported by the upstream API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
}

impl TokenUsage {
    /// Overwrite fields with values reported later in the stream.
    ///
    /// Only fields present in `later` replace existing values; a
    /// message_delta that reports output tokens alone keeps the input
    /// count seeded by message_start.
    pub fn overwrite_from(&mut self, later: &TokenUsage) {
        if later.input_tokens.is_some() {
            self.input_tokens = later.input_tokens;
        }
        if later.output_tokens.is_some() {
            self.output_tokens = later.output_tokens;
        }
    }
}

/// The assembled upstream response, as far as it could be observed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    /// Flattened text content (multi-part blocks concatenated)
    pub content: String,
    /// Why generation ended, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Final usage counters, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// One captured exchange, in flight between the proxy and persistence.
///
/// Serialized as-is onto the ephemeral queue (one JSON string per item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturePayload {
    /// Conversation id generated at request time (also returned to the
    /// caller as the correlation header)
    pub conversation_id: String,
    /// Caller-supplied user identifier, when resolvable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Upstream model identifier
    pub model: String,
    /// The original inbound message list, untouched
    pub messages: Vec<Value>,
    /// Assembled response; absent when the exchange produced none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
    /// Wall-clock ms from request start to full response receipt
    pub latency_ms: u64,
    /// Wall-clock ms from request start to first streamed chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
    /// Whether the exchange was streamed
    pub streamed: bool,
    /// When the payload was assembled
    pub captured_at: DateTime<Utc>,
}

impl CapturePayload {
    /// The conversation row this payload persists into
    pub fn conversation_record(&self) -> ConversationRecord {
        let started_at = self.captured_at - Duration::milliseconds(self.latency_ms as i64);
        ConversationRecord {
            id: self.conversation_id.clone(),
            user_id: self.user_id.clone(),
            model: self.model.clone(),
            started_at,
        }
    }

    /// The user turn derived from the outbound request
    pub fn user_turn(&self) -> TurnRecord {
        TurnRecord {
            conversation_id: self.conversation_id.clone(),
            role: ROLE_USER.to_string(),
            content: flatten_user_content(&self.messages),
            tokens_input: None,
            tokens_output: None,
            latency_ms: None,
            metadata: None,
            created_at: self.captured_at,
        }
    }

    /// The assistant turn, present only once a response was observed
    pub fn assistant_turn(&self) -> Option<TurnRecord> {
        let response = self.response.as_ref()?;

        let mut metadata = Map::new();
        if let Some(ttft) = self.ttft_ms {
            metadata.insert("ttft_ms".to_string(), Value::from(ttft));
        }
        if self.streamed {
            metadata.insert("streamed".to_string(), Value::from(true));
        }

        Some(TurnRecord {
            conversation_id: self.conversation_id.clone(),
            role: ROLE_ASSISTANT.to_string(),
            content: response.content.clone(),
            tokens_input: response.usage.as_ref().and_then(|u| u.input_tokens),
            tokens_output: response.usage.as_ref().and_then(|u| u.output_tokens),
            latency_ms: Some(self.latency_ms),
            metadata: if metadata.is_empty() {
                None
            } else {
                Some(metadata)
            },
            created_at: self.captured_at,
        })
    }
}

/// One persisted exchange session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub model: String,
    pub started_at: DateTime<Utc>,
}

/// One persisted message within a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_input: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_output: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

/// Flatten a message `content` value to plain text.
///
/// Content is either a bare string or a list of typed blocks; only text
/// blocks contribute, and multiple blocks are concatenated.
pub fn flatten_content(content: &Value) -> String {
    if let Some(s) = content.as_str() {
        return s.to_string();
    }

    let mut result = String::new();
    if let Some(blocks) = content.as_array() {
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    result.push_str(text);
                }
            }
        }
    }
    result
}

/// Concatenate the content of all user-role messages in a message list
pub fn flatten_user_content(messages: &[Value]) -> String {
    let parts: Vec<String> = messages
        .iter()
        .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some(ROLE_USER))
        .filter_map(|m| m.get("content"))
        .map(flatten_content)
        .filter(|s| !s.is_empty())
        .collect();

    parts.join("\n")
}

//! Incremental server-sent-event parsing for upstream message streams
//!
//! The parser consumes raw chunks as they flow through the passthrough
//! transform and keeps running state (accumulated text, usage counters,
//! stop reason) without buffering the full stream. It is strictly
//! best-effort: unparseable lines and unrecognized event types are skipped
//! so that nothing here can ever interrupt the byte stream being forwarded
//! to the caller.

use serde::Deserialize;

use crate::capture::TokenUsage;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// The closed set of event kinds the parser recognizes.
///
/// Events self-describe via their `type` field; everything outside this
/// set (pings, content_block_start/stop, message_stop) lands on
/// `Unrecognized` and is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: MessageStart,
    },
    ContentBlockDelta {
        #[serde(default)]
        delta: ContentDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Default, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentDelta {
    #[serde(default, rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Accumulated parse state returned on flush.
///
/// All fields beyond `content` are optional since a truncated or errored
/// stream may never report them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub content: String,
    pub stop_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Incremental parser over `data:`-framed event lines.
///
/// A `data:` line split across two chunks is carried in an internal byte
/// buffer and parsed once its newline arrives, so chunk boundaries never
/// drop events. Bytes are only decoded per complete line, which also keeps
/// multi-byte characters split across chunks intact.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    content: String,
    stop_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk.
    ///
    /// O(chunk size), no I/O, never fails - this runs inline in the
    /// passthrough transform and must not introduce backpressure.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.pending[start..end]).into_owned();
            self.handle_line(line.trim_end_matches('\r'));
            start = end + 1;
        }
        self.pending.drain(..start);
    }

    /// Flush the parser, draining any trailing unterminated line.
    pub fn finish(mut self) -> StreamSummary {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.handle_line(line.trim_end_matches('\r'));
        }

        StreamSummary {
            content: self.content,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return;
        }

        // Partial frames from chunk-split lines and unknown payloads are
        // expected; skip them without surfacing anything.
        let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
            return;
        };

        match event {
            StreamEvent::MessageStart { message } => {
                let mut usage = message.usage.unwrap_or_default();
                if usage.output_tokens.is_none() {
                    usage.output_tokens = Some(0);
                }
                self.usage = Some(usage);
            }
            StreamEvent::ContentBlockDelta { delta } => {
                if delta.delta_type == "text_delta" {
                    if let Some(text) = delta.text {
                        self.content.push_str(&text);
                    }
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(later) = usage {
                    self.usage
                        .get_or_insert_with(TokenUsage::default)
                        .overwrite_from(&later);
                }
            }
            StreamEvent::Unrecognized => {}
        }
    }
}

mod error;
mod messages;
mod server;
pub mod sse;
mod streaming;

pub use error::ProxyError;
pub use messages::{CONVERSATION_ID_HEADER, LATENCY_MS_HEADER, parse_message_response};
pub use server::{AppState, ProxyServer, UserIdResolver, create_router};
pub use sse::{SseParser, StreamSummary};
pub use streaming::{CaptureStream, StreamCaptureContext};

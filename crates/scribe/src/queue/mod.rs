//! Ephemeral queue clients
//!
//! The capture dispatcher pushes serialized payloads onto a named list;
//! the queue consumer pops them back off one at a time. FIFO ordering is
//! provided by the list semantics (LPUSH on one end, RPOP on the other);
//! delivery is at-least-once, which is acceptable because conversation
//! inserts are idempotent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::{Result, ScribeError};

/// A push/pop list structure holding serialized capture payloads
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Push one serialized payload onto the queue
    async fn push(&self, item: String) -> Result<()>;
    /// Pop the oldest queued item, if any
    async fn pop(&self) -> Result<Option<String>>;
    /// Number of items currently queued
    async fn depth(&self) -> Result<u64>;
}

/// Redis-backed queue over a single list key
pub struct RedisQueue {
    manager: ConnectionManager,
    key: String,
}

impl RedisQueue {
    /// Connect to the queue server and bind to the given list key.
    ///
    /// The connection manager reconnects on its own after transient
    /// failures, so this is only fallible at startup.
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ScribeError::Queue(format!("Invalid queue URL: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| ScribeError::Queue(format!("Failed to connect to queue: {e}")))?;

        Ok(Self {
            manager,
            key: key.into(),
        })
    }
}

#[async_trait]
impl QueueClient for RedisQueue {
    async fn push(&self, item: String) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(&self.key, item)
            .await
            .map_err(|e| ScribeError::Queue(format!("Push failed: {e}")))
    }

    async fn pop(&self) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.rpop::<_, Option<String>>(&self.key, None)
            .await
            .map_err(|e| ScribeError::Queue(format!("Pop failed: {e}")))
    }

    async fn depth(&self) -> Result<u64> {
        let mut conn = self.manager.clone();
        conn.llen::<_, u64>(&self.key)
            .await
            .map_err(|e| ScribeError::Queue(format!("Depth check failed: {e}")))
    }
}

/// In-memory queue for tests and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn push(&self, item: String) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<String>> {
        Ok(self
            .items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front())
    }

    async fn depth(&self) -> Result<u64> {
        Ok(self.items.lock().unwrap_or_else(|e| e.into_inner()).len() as u64)
    }
}

//! Durable store client
//!
//! The store exposes a REST-like insert interface: one endpoint per table,
//! POST to insert, `Prefer: return=minimal` because callers never need the
//! created row back. Conversation inserts are idempotent in intent - the
//! row may already exist from the direct-write path or a prior consumer
//! run, so a duplicate-key conflict is not a failure.

use reqwest::StatusCode;

use crate::capture::{CapturePayload, ConversationRecord, TurnRecord};
use crate::error::{Result, ScribeError};

/// REST client for the durable conversation store
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Insert the conversation row; an HTTP 409 conflict counts as success.
    pub async fn insert_conversation(&self, record: &ConversationRecord) -> Result<()> {
        let response = self
            .post("conversations")
            .json(record)
            .send()
            .await
            .map_err(|e| ScribeError::Store(format!("Conversation insert failed: {e}")))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ScribeError::Store(format!(
            "Conversation insert returned HTTP {status}: {body}"
        )))
    }

    /// Insert one turn row
    pub async fn insert_turn(&self, turn: &TurnRecord) -> Result<()> {
        let response = self
            .post("turns")
            .json(turn)
            .send()
            .await
            .map_err(|e| ScribeError::Store(format!("Turn insert failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScribeError::Store(format!(
                "Turn insert returned HTTP {status}: {body}"
            )));
        }

        Ok(())
    }

    /// The two-step write shared by the dispatcher's direct path and the
    /// queue consumer: conversation upsert, user turn, then assistant turn
    /// when a response was observed.
    pub async fn persist_payload(&self, payload: &CapturePayload) -> Result<()> {
        self.insert_conversation(&payload.conversation_record())
            .await?;
        self.insert_turn(&payload.user_turn()).await?;

        if let Some(turn) = payload.assistant_turn() {
            self.insert_turn(&turn).await?;
        }

        Ok(())
    }

    fn post(&self, table: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
    }
}

//! Wire shapes of the workflow engine and the chat REST API.
//!
//! Everything here is decoded at the boundary and converted into core types
//! before it leaves the crate.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use synapse_core::{AssistantReply, Message, Role, Session, SessionId, TransportError};

/// Reply metadata keys the chat API reports next to `response`.
const REPLY_METADATA_KEYS: [&str; 3] = ["ai_provider", "model_used", "processing_time"];

// --- GraphQL ---

/// GraphQL request body.
#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest {
    pub query: &'static str,
    pub variables: Value,
}

/// One entry of a GraphQL `errors` array.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

/// GraphQL response body.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlError>>,
}

impl GraphQlResponse {
    /// The first reported error, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&str> {
        self.errors
            .as_deref()
            .and_then(<[GraphQlError]>::first)
            .map(|e| e.message.as_str())
    }

    /// Take the value of the top-level `field`.
    ///
    /// # Errors
    /// Returns [`TransportError::Decode`] if `data` or the field is missing.
    pub fn take_field(&mut self, field: &str) -> Result<Value, TransportError> {
        self.data
            .as_mut()
            .and_then(|data| data.remove(field))
            .filter(|value| !value.is_null())
            .ok_or_else(|| TransportError::Decode(format!("response has no data.{field}")))
    }
}

// --- chat REST API ---

/// `POST /chat/start` response.
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
}

/// `GET /chat/sessions` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsResponse {
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

/// One session as listed by the chat API.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "createdAt", alias = "created")]
    pub created_at: Option<String>,
}

impl SessionEntry {
    /// Convert to a core session. A missing title falls back to `fallback_title`.
    #[must_use]
    pub fn into_session(self, fallback_title: impl FnOnce(&str) -> String) -> Session {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| fallback_title(&self.id));
        Session {
            created_at: self
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            id: SessionId::from_remote(self.id),
            title,
        }
    }
}

/// `GET /chat/history/{id}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// One stored message.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl HistoryEntry {
    /// Convert to a core message. Entries without a role are not messages.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        let role = self.role?;
        let mut message = Message::new(role, self.content.unwrap_or_default(), self.metadata);
        if let Some(timestamp) = self.timestamp.as_deref().and_then(parse_timestamp) {
            message.timestamp = timestamp;
        }
        Some(message)
    }
}

/// `POST /chat/message` request body.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
}

/// `POST /chat/message` response.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub response: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageResponse {
    /// Convert to a reply. Without an explicit `metadata` object, known
    /// top-level reply fields are folded into one.
    #[must_use]
    pub fn into_reply(self) -> AssistantReply {
        let metadata = self.metadata.or_else(|| {
            let folded: Map<String, Value> = REPLY_METADATA_KEYS
                .iter()
                .filter_map(|key| {
                    self.extra
                        .get(*key)
                        .filter(|v| !v.is_null())
                        .map(|v| ((*key).to_owned(), v.clone()))
                })
                .collect();
            (!folded.is_empty()).then_some(Value::Object(folded))
        });
        AssistantReply {
            content: self.response,
            metadata,
        }
    }
}

/// `GET /chat/title/{id}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TitleResponse {
    #[serde(default)]
    pub title: Option<String>,
}

/// Parse an RFC 3339 timestamp, or a naive ISO one taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

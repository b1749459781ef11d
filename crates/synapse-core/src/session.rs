//! Chat sessions and their messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Remote-assigned session identifier.
///
/// Only the remote store mints these; there is no local constructor that
/// invents one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an id returned by the remote store.
    #[must_use]
    pub fn from_remote(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Session metadata, the unit persisted in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create session metadata stamped with the current time.
    #[must_use]
    pub fn new(id: SessionId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether the title is still an ordinal placeholder.
    #[must_use]
    pub fn has_placeholder_title(&self, prefix: &str) -> bool {
        self.title.starts_with(prefix)
    }
}

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Metadata key marking a locally generated failure notice.
const ERROR_KEY: &str = "error";

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>, metadata: Option<Value>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, None)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, metadata: Option<Value>) -> Self {
        Self::new(Role::Assistant, content, metadata)
    }

    /// System-role notice explaining a failed send.
    #[must_use]
    pub fn send_failure(detail: &str) -> Self {
        Self::new(
            Role::System,
            "Failed to send message. Please try again.",
            Some(json!({ ERROR_KEY: detail })),
        )
    }

    /// Whether this is a locally generated failure notice.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.role == Role::System
            && self
                .metadata
                .as_ref()
                .is_some_and(|m| m.get(ERROR_KEY).is_some())
    }
}

/// Assistant reply returned by the post-message endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

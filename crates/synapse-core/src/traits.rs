//! Seams to the remote services and the local cache, plus the error
//! vocabulary they share.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    job::{Job, RemoteResponse},
    session::{AssistantReply, Message, Session, SessionId},
};

/// Network or decode failure talking to a remote service.
///
/// Always terminal for the call in progress; never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Local cache error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Cache error: {0}")]
    Internal(String),
}

/// Submit and status-check capability of the remote workflow engine.
#[async_trait]
pub trait JobRemote: Send + Sync {
    /// Submit a job. The response is terminal or carries a request id.
    async fn submit(&self, job: &Job) -> Result<RemoteResponse, TransportError>;

    /// Query the status of a pending request.
    async fn check_status(&self, request_id: &str) -> Result<RemoteResponse, TransportError>;
}

/// Remote chat persistence service. The authoritative store for sessions.
#[async_trait]
pub trait SessionRemote: Send + Sync {
    /// List all sessions.
    async fn list_sessions(&self) -> Result<Vec<Session>, TransportError>;

    /// Start a new session and return its id.
    async fn start_session(&self) -> Result<SessionId, TransportError>;

    /// Fetch the message history of a session.
    async fn fetch_history(&self, id: &SessionId) -> Result<Vec<Message>, TransportError>;

    /// Post a user message and wait for the assistant reply.
    async fn post_message(
        &self,
        id: &SessionId,
        message: &str,
    ) -> Result<AssistantReply, TransportError>;

    /// Ask the store to derive a title from the session content.
    async fn derive_title(&self, id: &SessionId) -> Result<Option<String>, TransportError>;

    /// Delete a session. Backends without a delete endpoint keep the default.
    async fn delete_session(&self, _id: &SessionId) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Local durable mirror of session metadata.
///
/// Holds a single list, overwritten wholesale on every store.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Load the cached list. An absent cache is an empty list.
    async fn load(&self) -> Result<Vec<Session>, CacheError>;

    /// Replace the cached list.
    async fn store(&self, sessions: &[Session]) -> Result<(), CacheError>;
}

#[async_trait]
impl<T> SessionCache for Arc<T>
where
    T: SessionCache + ?Sized,
{
    async fn load(&self) -> Result<Vec<Session>, CacheError> {
        (**self).load().await
    }

    async fn store(&self, sessions: &[Session]) -> Result<(), CacheError> {
        (**self).store(sessions).await
    }
}

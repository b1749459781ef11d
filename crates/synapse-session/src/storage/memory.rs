//! In-memory session cache.

use std::sync::RwLock;

use async_trait::async_trait;
use synapse_core::{CacheError, Session, SessionCache};

/// In-memory cache implementation.
///
/// Useful for tests and for clients that only need resilience within one
/// process. Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCache {
    sessions: RwLock<Vec<Session>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-populated with `sessions`.
    #[must_use]
    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        Self {
            sessions: RwLock::new(sessions),
        }
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn load(&self) -> Result<Vec<Session>, CacheError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| CacheError::Internal(e.to_string()))?
            .clone())
    }

    async fn store(&self, sessions: &[Session]) -> Result<(), CacheError> {
        *self
            .sessions
            .write()
            .map_err(|e| CacheError::Internal(e.to_string()))? = sessions.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use synapse_core::SessionId;

    use super::*;

    #[tokio::test]
    async fn test_store_overwrites_wholesale() {
        let cache = MemoryCache::with_sessions(vec![Session::new(
            SessionId::from_remote("old"),
            "Chat 1",
        )]);

        let fresh = vec![
            Session::new(SessionId::from_remote("a"), "Chat 2"),
            Session::new(SessionId::from_remote("b"), "Chat 1"),
        ];
        cache.store(&fresh).await.unwrap();

        assert_eq!(cache.load().await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_empty_by_default() {
        assert!(MemoryCache::new().load().await.unwrap().is_empty());
    }
}

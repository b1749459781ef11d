//! Broadcast + history store of synchronizer events.
//!
//! Presentation code subscribes here instead of polling state: a late
//! subscriber replays the retained history, then follows live updates.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::session::{Message, Session, SessionId};

/// Default number of events retained for replay.
const HISTORY_LIMIT: usize = 512;

/// Broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 1024;

/// State change emitted by the session synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The session list was replaced wholesale.
    SessionsReplaced { sessions: Vec<Session>, stale: bool },
    /// A session was confirmed by the remote store.
    SessionCreated { session: Session },
    /// Selection changed.
    Selected { id: Option<SessionId> },
    /// A history fetch succeeded.
    HistoryLoaded { id: SessionId, messages: Vec<Message> },
    /// A history fetch failed.
    HistoryFailed { id: SessionId, error: String },
    /// A message was appended to a session's history.
    MessageAppended { id: SessionId, message: Message },
    /// A session's title changed.
    TitleUpdated { id: SessionId, title: String },
    /// A session was removed locally.
    SessionDeleted { id: SessionId },
}

/// Event store with broadcast and bounded history.
pub struct EventStore {
    history: RwLock<VecDeque<SyncEvent>>,
    limit: usize,
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create an event store with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }

    /// Create an event store retaining at most `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(VecDeque::with_capacity(limit.min(64))),
            limit: limit.max(1),
            sender,
        }
    }

    /// Push an event to live listeners and history.
    pub fn push(&self, event: SyncEvent) {
        let _ = self.sender.send(event.clone()); // no listeners is fine

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.limit {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<SyncEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Lagged receivers skip the dropped events rather than ending the stream.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SyncEvent> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(id: &str) -> SyncEvent {
        SyncEvent::Selected {
            id: Some(SessionId::from_remote(id)),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let store = EventStore::with_limit(2);
        store.push(selected("a"));
        store.push(selected("b"));
        store.push(selected("c"));

        assert_eq!(store.history(), vec![selected("b"), selected("c")]);
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = EventStore::new();
        store.push(selected("a"));

        let mut stream = store.history_plus_stream();
        store.push(selected("b"));

        assert_eq!(stream.next().await, Some(selected("a")));
        assert_eq!(stream.next().await, Some(selected("b")));
    }

    #[tokio::test]
    async fn test_live_receiver_sees_push() {
        let store = EventStore::new();
        let mut rx = store.subscribe();
        store.push(SyncEvent::SessionDeleted {
            id: SessionId::from_remote("gone"),
        });

        let event = tokio_test::assert_ok!(rx.recv().await);
        assert!(matches!(event, SyncEvent::SessionDeleted { .. }));
    }
}

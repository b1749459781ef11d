//! Session synchronizer: keeps the session list, the current selection and
//! per-session histories consistent across the remote store and the local
//! cache.
//!
//! The remote store is authoritative for session metadata. The cache is a
//! best-effort mirror used for the first paint and for riding out transient
//! network loss. No lock is held across a remote call.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use synapse_core::{
    CacheError, EventStore, Message, Session, SessionCache, SessionId, SessionRemote, SyncEvent,
    TransportError, settings::SyncSettings,
};
use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Session synchronizer error.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Session {0} is not the current session")]
    NotCurrent(SessionId),
    #[error("No session selected")]
    NoSession,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Remote store returned deleted session id: {0}")]
    ReusedId(SessionId),
}

/// Synchronizer behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Prefix of placeholder titles; new sessions are `<prefix><ordinal>`.
    pub placeholder_prefix: String,
    /// Refresh placeholder titles after a successful send.
    pub auto_title: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            placeholder_prefix: settings.placeholder_prefix.clone(),
            auto_title: settings.auto_title,
        }
    }
}

/// Message history of one session as seen locally.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum History {
    /// Never fetched.
    #[default]
    NotLoaded,
    /// Known messages, oldest first.
    Loaded(Vec<Message>),
    /// The last fetch failed. Distinct from an empty history.
    Failed(String),
    /// Messages appended locally on top of a history that never loaded.
    /// `fetch_error` keeps the failure of the last fetch, if there was one.
    Partial {
        messages: Vec<Message>,
        fetch_error: Option<String>,
    },
}

impl History {
    /// Messages held locally, complete or not.
    #[must_use]
    pub fn messages(&self) -> Option<&[Message]> {
        match self {
            Self::Loaded(messages) | Self::Partial { messages, .. } => Some(messages),
            Self::NotLoaded | Self::Failed(_) => None,
        }
    }

    /// Whether the held messages are the full stored history.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// Where `load_sessions` got its list from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    /// The remote call failed; the list is last-known-good data.
    Cache,
}

/// Result of a send once its preconditions held.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The assistant reply that was appended.
    Delivered(Message),
    /// The remote call failed; `notice` was appended after the user message.
    Failed {
        notice: Message,
        error: TransportError,
    },
}

/// State owned by one synchronizer instance.
#[derive(Debug, Default)]
struct SynchronizerState {
    sessions: Vec<Session>,
    histories: HashMap<SessionId, History>,
    selected: Option<SessionId>,
    /// Ids deleted during this instance's lifetime. Never accepted again.
    tombstones: HashSet<SessionId>,
}

impl SynchronizerState {
    fn position(&self, id: &SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| &s.id == id)
    }

    fn contains(&self, id: &SessionId) -> bool {
        self.position(id).is_some()
    }

    fn session_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    /// Append to the history of `id`. Without a loaded history the result
    /// stays marked partial.
    fn push_message(&mut self, id: &SessionId, message: Message) {
        let history = self.histories.entry(id.clone()).or_default();
        match history {
            History::Loaded(messages) | History::Partial { messages, .. } => messages.push(message),
            History::NotLoaded => {
                *history = History::Partial {
                    messages: vec![message],
                    fetch_error: None,
                };
            }
            History::Failed(error) => {
                let fetch_error = Some(std::mem::take(error));
                *history = History::Partial {
                    messages: vec![message],
                    fetch_error,
                };
            }
        }
    }

    fn without_tombstones(&self, sessions: Vec<Session>) -> Vec<Session> {
        sessions
            .into_iter()
            .filter(|s| {
                let deleted = self.tombstones.contains(&s.id);
                if deleted {
                    debug!(session_id = %s.id, "dropping deleted session from list");
                }
                !deleted
            })
            .collect()
    }
}

/// Synchronizes chat sessions between a remote store and a local cache.
pub struct SessionSynchronizer<R, C>
where
    R: SessionRemote + 'static,
    C: SessionCache,
{
    remote: Arc<R>,
    cache: C,
    options: SyncOptions,
    state: RwLock<SynchronizerState>,
    /// Serializes cache writes so the last writer stores the latest list.
    persist_lock: Mutex<()>,
    selection: watch::Sender<Option<SessionId>>,
    events: EventStore,
}

impl<R, C> SessionSynchronizer<R, C>
where
    R: SessionRemote + 'static,
    C: SessionCache,
{
    /// Create a synchronizer with an empty state.
    #[must_use]
    pub fn new(remote: Arc<R>, cache: C, options: SyncOptions) -> Self {
        let (selection, _) = watch::channel(None);
        Self {
            remote,
            cache,
            options,
            state: RwLock::new(SynchronizerState::default()),
            persist_lock: Mutex::new(()),
            selection,
            events: EventStore::new(),
        }
    }

    /// Create a synchronizer with default options.
    #[must_use]
    pub fn with_defaults(remote: Arc<R>, cache: C) -> Self {
        Self::new(remote, cache, SyncOptions::default())
    }

    // --- observable state ---

    /// Snapshot of the session list, newest first.
    pub async fn sessions(&self) -> Vec<Session> {
        self.state.read().await.sessions.clone()
    }

    /// Metadata of one session.
    pub async fn session(&self, id: &SessionId) -> Option<Session> {
        let state = self.state.read().await;
        state.sessions.iter().find(|s| &s.id == id).cloned()
    }

    /// The current selection.
    pub async fn current(&self) -> Option<SessionId> {
        self.state.read().await.selected.clone()
    }

    /// History of one session.
    pub async fn history(&self, id: &SessionId) -> History {
        self.state
            .read()
            .await
            .histories
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Watch the current selection.
    #[must_use]
    pub fn subscribe_selection(&self) -> watch::Receiver<Option<SessionId>> {
        self.selection.subscribe()
    }

    /// Event store carrying every state change.
    #[must_use]
    pub const fn events(&self) -> &EventStore {
        &self.events
    }

    // --- lifecycle ---

    /// Reset selection and histories, paint from cache, then refresh from the
    /// remote store.
    pub async fn initialize(&self) -> LoadSource {
        {
            let mut state = self.state.write().await;
            state.histories.clear();
            self.set_selection(&mut state, None);
        }
        self.events.push(SyncEvent::Selected { id: None });

        if let Err(e) = self.load_cached().await {
            warn!(error = %e, "session cache unreadable");
        }
        self.load_sessions().await
    }

    /// Populate the list from the cache without touching the network.
    ///
    /// # Errors
    /// Returns error if the cache cannot be read; state is left untouched.
    pub async fn load_cached(&self) -> Result<usize, SyncError> {
        let cached = self.cache.load().await?;
        let sessions = {
            let mut state = self.state.write().await;
            state.sessions = state.without_tombstones(cached);
            state.sessions.clone()
        };
        let count = sessions.len();
        debug!(count, "painted sessions from cache");
        self.events.push(SyncEvent::SessionsReplaced {
            sessions,
            stale: true,
        });
        Ok(count)
    }

    /// Fetch the session list. The remote list replaces the local one in
    /// full. On transport failure the in-memory list is kept, or painted from
    /// the cache when nothing is held yet.
    pub async fn load_sessions(&self) -> LoadSource {
        match self.remote.list_sessions().await {
            Ok(remote_sessions) => {
                let (sessions, cleared) = {
                    let mut state = self.state.write().await;
                    state.sessions = state.without_tombstones(remote_sessions);

                    let SynchronizerState {
                        sessions,
                        histories,
                        ..
                    } = &mut *state;
                    histories.retain(|id, _| sessions.iter().any(|s| &s.id == id));

                    let cleared = match state.selected.clone() {
                        Some(id) if !state.contains(&id) => {
                            self.set_selection(&mut state, None);
                            true
                        }
                        _ => false,
                    };
                    (state.sessions.clone(), cleared)
                };

                info!(count = sessions.len(), "session list refreshed from remote");
                self.persist().await;
                self.events.push(SyncEvent::SessionsReplaced {
                    sessions,
                    stale: false,
                });
                if cleared {
                    self.events.push(SyncEvent::Selected { id: None });
                }
                LoadSource::Remote
            }
            Err(err) => {
                warn!(error = %err, "listing sessions failed, keeping cached list");
                self.fall_back_to_cache().await;
                LoadSource::Cache
            }
        }
    }

    /// Keep the in-memory list as last-known-good data. The cache is only
    /// read when nothing is held in memory yet.
    async fn fall_back_to_cache(&self) {
        if !self.state.read().await.sessions.is_empty() {
            debug!("keeping in-memory session list");
            return;
        }

        let cached = match self.cache.load().await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "session cache unreadable");
                return;
            }
        };
        if cached.is_empty() {
            return;
        }

        let (sessions, cleared) = {
            let mut state = self.state.write().await;
            if !state.sessions.is_empty() {
                // Filled by a concurrent operation while the cache was read.
                return;
            }
            state.sessions = state.without_tombstones(cached);

            let cleared = match state.selected.clone() {
                Some(id) if !state.contains(&id) => {
                    self.set_selection(&mut state, None);
                    true
                }
                _ => false,
            };
            (state.sessions.clone(), cleared)
        };
        self.events.push(SyncEvent::SessionsReplaced {
            sessions,
            stale: true,
        });
        if cleared {
            self.events.push(SyncEvent::Selected { id: None });
        }
    }

    // --- sessions ---

    /// Ask the remote store for a new session, then insert and select it.
    ///
    /// # Errors
    /// Returns error if the remote call fails; no state changes in that case.
    pub async fn create_session(&self) -> Result<Session, SyncError> {
        let id = self.remote.start_session().await.map_err(|e| {
            warn!(error = %e, "starting session failed");
            e
        })?;

        let session = {
            let mut state = self.state.write().await;
            if state.tombstones.contains(&id) {
                return Err(SyncError::ReusedId(id));
            }
            if let Some(existing) = state.sessions.iter().find(|s| s.id == id).cloned() {
                self.set_selection(&mut state, Some(id));
                drop(state);
                self.events.push(SyncEvent::Selected {
                    id: Some(existing.id.clone()),
                });
                return Ok(existing);
            }

            let title = format!(
                "{}{}",
                self.options.placeholder_prefix,
                state.sessions.len() + 1
            );
            let session = Session::new(id.clone(), title);
            state.sessions.insert(0, session.clone());
            state
                .histories
                .insert(id.clone(), History::Loaded(Vec::new()));
            self.set_selection(&mut state, Some(id));
            session
        };

        info!(session_id = %session.id, title = %session.title, "session created");
        self.persist().await;
        self.events.push(SyncEvent::SessionCreated {
            session: session.clone(),
        });
        self.events.push(SyncEvent::Selected {
            id: Some(session.id.clone()),
        });
        Ok(session)
    }

    /// Select a known session and load its history.
    ///
    /// Returns `Ok(false)` without changing anything if `id` is unknown.
    ///
    /// # Errors
    /// Returns error if the history fetch fails; the selection still moves.
    pub async fn select_session(&self, id: &SessionId) -> Result<bool, SyncError> {
        {
            let mut state = self.state.write().await;
            if !state.contains(id) {
                debug!(session_id = %id, "ignoring selection of unknown session");
                return Ok(false);
            }
            self.set_selection(&mut state, Some(id.clone()));
        }
        self.events.push(SyncEvent::Selected {
            id: Some(id.clone()),
        });

        self.load_history(id).await?;
        Ok(true)
    }

    /// Fetch the history of `id`, replacing what is held locally.
    ///
    /// # Errors
    /// Returns error if `id` is unknown or the fetch fails. A failed fetch
    /// leaves [`History::Failed`] behind.
    pub async fn load_history(&self, id: &SessionId) -> Result<Vec<Message>, SyncError> {
        if !self.state.read().await.contains(id) {
            return Err(SyncError::NotFound(id.clone()));
        }

        match self.remote.fetch_history(id).await {
            Ok(messages) => {
                {
                    let mut state = self.state.write().await;
                    if !state.contains(id) {
                        return Err(SyncError::NotFound(id.clone()));
                    }
                    state
                        .histories
                        .insert(id.clone(), History::Loaded(messages.clone()));
                }
                debug!(session_id = %id, count = messages.len(), "history loaded");
                self.events.push(SyncEvent::HistoryLoaded {
                    id: id.clone(),
                    messages: messages.clone(),
                });
                Ok(messages)
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "loading history failed");
                {
                    let mut state = self.state.write().await;
                    if state.contains(id) {
                        state
                            .histories
                            .insert(id.clone(), History::Failed(err.to_string()));
                    }
                }
                self.events.push(SyncEvent::HistoryFailed {
                    id: id.clone(),
                    error: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    /// Send a message in the current session.
    ///
    /// The user message is appended before the remote call so it is visible
    /// immediately. On remote failure it stays, followed by a failure notice.
    /// Nothing is retried.
    ///
    /// # Errors
    /// Returns error only when a precondition fails: blank content, nothing
    /// selected, or `id` is not the current session.
    pub async fn send_message(
        &self,
        id: &SessionId,
        content: &str,
    ) -> Result<SendOutcome, SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let user_message = Message::user(content);
        {
            let mut state = self.state.write().await;
            match &state.selected {
                None => return Err(SyncError::NoSession),
                Some(current) if current != id => return Err(SyncError::NotCurrent(id.clone())),
                Some(_) => {}
            }
            state.push_message(id, user_message.clone());
        }
        self.events.push(SyncEvent::MessageAppended {
            id: id.clone(),
            message: user_message,
        });

        match self.remote.post_message(id, content).await {
            Ok(reply) => {
                let message = Message::assistant(reply.content, reply.metadata);
                self.append(id, message.clone()).await;

                if self.options.auto_title {
                    if let Err(e) = self.update_title_if_default(id).await {
                        warn!(session_id = %id, error = %e, "title refresh failed");
                    }
                }
                Ok(SendOutcome::Delivered(message))
            }
            Err(error) => {
                warn!(session_id = %id, error = %error, "sending message failed");
                let notice = Message::send_failure(&error.to_string());
                self.append(id, notice.clone()).await;
                Ok(SendOutcome::Failed { notice, error })
            }
        }
    }

    async fn append(&self, id: &SessionId, message: Message) {
        {
            let mut state = self.state.write().await;
            if !state.contains(id) {
                debug!(session_id = %id, "session gone before reply arrived");
                return;
            }
            state.push_message(id, message.clone());
        }
        self.events.push(SyncEvent::MessageAppended {
            id: id.clone(),
            message,
        });
    }

    /// Replace a placeholder title with one derived by the remote store.
    ///
    /// Titles that no longer match the placeholder pattern are never touched,
    /// and no remote call is made for them.
    ///
    /// # Errors
    /// Returns error if `id` is unknown or the remote call fails.
    pub async fn update_title_if_default(
        &self,
        id: &SessionId,
    ) -> Result<Option<String>, SyncError> {
        let prefix = &self.options.placeholder_prefix;
        {
            let state = self.state.read().await;
            let session = state
                .sessions
                .iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            if !session.has_placeholder_title(prefix) {
                return Ok(None);
            }
        }

        let Some(title) = self
            .remote
            .derive_title(id)
            .await?
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
        else {
            return Ok(None);
        };

        {
            let mut state = self.state.write().await;
            let Some(session) = state.session_mut(id) else {
                return Ok(None);
            };
            // Re-check: the title may have changed while we were waiting.
            if !session.has_placeholder_title(prefix) || session.title == title {
                return Ok(None);
            }
            session.title.clone_from(&title);
        }

        debug!(session_id = %id, %title, "title updated");
        self.persist().await;
        self.events.push(SyncEvent::TitleUpdated {
            id: id.clone(),
            title: title.clone(),
        });
        Ok(Some(title))
    }

    /// Remove a session locally and ask the remote store to delete it.
    ///
    /// The local removal is unconditional and never rolled back. The remote
    /// delete runs in the background; its handle is returned so callers may
    /// await it. Returns `None` for an unknown id.
    pub async fn delete_session(&self, id: &SessionId) -> Option<JoinHandle<()>> {
        let was_selected = {
            let mut state = self.state.write().await;
            let index = state.position(id)?;
            state.sessions.remove(index);
            state.histories.remove(id);
            state.tombstones.insert(id.clone());

            let was_selected = state.selected.as_ref() == Some(id);
            if was_selected {
                self.set_selection(&mut state, None);
            }
            was_selected
        };

        info!(session_id = %id, "session deleted locally");
        self.persist().await;
        self.events
            .push(SyncEvent::SessionDeleted { id: id.clone() });
        if was_selected {
            self.events.push(SyncEvent::Selected { id: None });
        }

        let remote = Arc::clone(&self.remote);
        let id = id.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = remote.delete_session(&id).await {
                warn!(session_id = %id, error = %e, "remote delete failed, local view kept");
            }
        }))
    }

    // --- internals ---

    fn set_selection(&self, state: &mut SynchronizerState, id: Option<SessionId>) {
        state.selected.clone_from(&id);
        self.selection.send_replace(id);
    }

    /// Write the current list to the cache. Failures are logged only.
    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.state.read().await.sessions.clone();
        if let Err(e) = self.cache.store(&snapshot).await {
            warn!(error = %e, "persisting session cache failed");
        }
    }
}

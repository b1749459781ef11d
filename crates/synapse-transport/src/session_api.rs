//! Chat REST API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use synapse_core::{
    AssistantReply, Message, Session, SessionId, SessionRemote, TransportError,
};
use tracing::debug;

use crate::{
    error::{ClientError, read_body, transport_error},
    protocol::{
        HistoryResponse, MessageRequest, MessageResponse, SessionsResponse, StartResponse,
        TitleResponse,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Title given to listed sessions the API reports without one.
const FALLBACK_TITLE_PREFIX: &str = "Chat ";

/// [`SessionRemote`] over the chat REST API.
#[derive(Debug, Clone)]
pub struct HttpSessionRemote {
    http: Client,
    base: Url,
}

impl HttpSessionRemote {
    /// Create a client rooted at `base_url` (e.g. `http://localhost:5300/api`).
    ///
    /// # Errors
    /// Returns error if `base_url` is not an absolute http(s) URL or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: base_url.to_owned(),
            reason,
        };
        let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("not an http(s) base URL".into()));
        }

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let body = read_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn fallback_title(id: &str) -> String {
    let short: String = id.chars().take(8).collect();
    format!("{FALLBACK_TITLE_PREFIX}{short}")
}

#[async_trait]
impl SessionRemote for HttpSessionRemote {
    async fn list_sessions(&self) -> Result<Vec<Session>, TransportError> {
        let listing: SessionsResponse = self
            .fetch(self.http.get(self.url(&["chat", "sessions"])))
            .await?;
        debug!(count = listing.sessions.len(), "listed sessions");
        Ok(listing
            .sessions
            .into_iter()
            .map(|entry| entry.into_session(fallback_title))
            .collect())
    }

    async fn start_session(&self) -> Result<SessionId, TransportError> {
        let started: StartResponse = self
            .fetch(self.http.post(self.url(&["chat", "start"])))
            .await?;
        if started.session_id.trim().is_empty() {
            return Err(TransportError::Decode("empty session id".into()));
        }
        debug!(session_id = %started.session_id, "session started");
        Ok(SessionId::from_remote(started.session_id))
    }

    async fn fetch_history(&self, id: &SessionId) -> Result<Vec<Message>, TransportError> {
        let history: HistoryResponse = self
            .fetch(self.http.get(self.url(&["chat", "history", id.as_str()])))
            .await?;
        Ok(history
            .history
            .into_iter()
            .filter_map(|entry| entry.into_message())
            .collect())
    }

    async fn post_message(
        &self,
        id: &SessionId,
        message: &str,
    ) -> Result<AssistantReply, TransportError> {
        let body = MessageRequest {
            session_id: id.as_str(),
            message,
        };
        let response: MessageResponse = self
            .fetch(self.http.post(self.url(&["chat", "message"])).json(&body))
            .await?;
        Ok(response.into_reply())
    }

    async fn derive_title(&self, id: &SessionId) -> Result<Option<String>, TransportError> {
        let response: TitleResponse = self
            .fetch(self.http.get(self.url(&["chat", "title", id.as_str()])))
            .await?;
        Ok(response
            .title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty()))
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), TransportError> {
        let response = self
            .http
            .delete(self.url(&["chat", "history", id.as_str()]))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        read_body(response).await?;
        debug!(session_id = %id, "remote session deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use synapse_core::Role;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    use super::*;

    fn remote(server: &MockServer) -> HttpSessionRemote {
        HttpSessionRemote::new(&format!("{}/api", server.uri())).unwrap()
    }

    fn sid(id: &str) -> SessionId {
        SessionId::from_remote(id)
    }

    #[tokio::test]
    async fn test_start_and_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "s1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/chat/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sessions": [
                    {"id": "s1", "title": "Groceries", "created": "2024-05-01T10:00:00", "last_message": null},
                    {"id": "0123456789abcdef", "title": null, "created": null}
                ]
            })))
            .mount(&server)
            .await;

        let remote = remote(&server);
        assert_eq!(remote.start_session().await.unwrap(), sid("s1"));

        let sessions = remote.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].title, "Groceries");
        assert_eq!(sessions[1].title, "Chat 01234567");
    }

    #[tokio::test]
    async fn test_history_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/history/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "session_id": "s1",
                "history": [
                    {"role": "user", "content": "ping", "timestamp": "2024-05-01T10:00:00"},
                    {"role": "assistant", "content": "pong", "timestamp": "2024-05-01T10:00:01"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat/message"))
            .and(body_json(json!({"session_id": "s1", "message": "again"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "pong again",
                "ai_provider": "ollama",
                "model_used": "llama3",
                "processing_time": 0.0,
                "chat_title": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let remote = remote(&server);
        let history = remote.fetch_history(&sid("s1")).await.unwrap();
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant]);

        let reply = remote.post_message(&sid("s1"), "again").await.unwrap();
        assert_eq!(reply.content, "pong again");
        assert_eq!(reply.metadata.unwrap()["model_used"], "llama3");
    }

    #[tokio::test]
    async fn test_title_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/title/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": " Trip plans "})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/chat/history/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "deleted"})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = remote(&server);
        assert_eq!(
            remote.derive_title(&sid("s1")).await.unwrap().as_deref(),
            Some("Trip plans")
        );
        remote.delete_session(&sid("s1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_and_bad_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/history/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("qdrant down"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat/start"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let remote = remote(&server);
        let err = remote.fetch_history(&sid("broken")).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 500,
                body: "qdrant down".into()
            }
        );
        assert!(matches!(
            remote.start_session().await,
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_url_building() {
        let remote = HttpSessionRemote::new("http://localhost:5300/api/").unwrap();
        assert_eq!(
            remote.url(&["chat", "history", "a b"]).as_str(),
            "http://localhost:5300/api/chat/history/a%20b"
        );
        assert!(HttpSessionRemote::new("not a url").is_err());
        assert!(HttpSessionRemote::new("mailto:someone@example.com").is_err());
    }
}

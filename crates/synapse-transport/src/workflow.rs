//! GraphQL client of the remote workflow engine.

use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use synapse_core::{
    Job, JobKind, JobRemote, RemoteResponse, TransportError, settings::WorkflowSettings,
};
use tracing::{debug, warn};

use crate::{
    error::{ClientError, transport_error},
    protocol::{GraphQlRequest, GraphQlResponse},
};

const EXECUTE_WORKFLOW: &str = "query ExecuteWorkflow($workflowId: String!, $payload: JSON!) {
  executeWorkflow(workflowId: $workflowId, payload: $payload) {
    status
    result
  }
}";

const EXECUTE_AGENT: &str = "query ExecuteAgent($agentId: String!, $payload: JSON!) {
  executeAgent(agentId: $agentId, payload: $payload) {
    status
    result
  }
}";

const CHECK_STATUS: &str = "query CheckStatus($requestId: String!) {
  checkStatus(requestId: $requestId)
}";

const SIGNATURE_HEADER: &str = "X-Lamatic-Signature";
const PROJECT_HEADER: &str = "x-project-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How requests authenticate against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Sent as `Authorization: Bearer <key>`.
    ApiKey(String),
    /// Sent as a signature header. Takes precedence over an API key.
    AccessToken(String),
}

/// Workflow engine client implementing [`JobRemote`].
#[derive(Debug)]
pub struct WorkflowClient {
    http: Client,
    endpoint: String,
    project_id: String,
    credentials: RwLock<Credentials>,
}

impl WorkflowClient {
    /// Create a client for `endpoint`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            credentials: RwLock::new(credentials),
        })
    }

    /// Create a client from settings.
    ///
    /// # Errors
    /// Returns error if no endpoint or no credentials are configured.
    pub fn from_settings(settings: &WorkflowSettings) -> Result<Self, ClientError> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or(ClientError::MissingEndpoint)?;
        let credentials = match (&settings.access_token, &settings.api_key) {
            (Some(token), _) if !token.is_empty() => Credentials::AccessToken(token.clone()),
            (_, Some(key)) if !key.is_empty() => Credentials::ApiKey(key.clone()),
            _ => return Err(ClientError::MissingCredentials),
        };
        Self::new(endpoint, settings.project_id.clone(), credentials)
    }

    /// Rotate the access token used by subsequent requests.
    pub fn update_access_token(&self, token: impl Into<String>) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Credentials::AccessToken(token.into());
        debug!("workflow access token updated");
    }

    fn credentials(&self) -> Credentials {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one GraphQL query and decode `data.<field>` as a status body.
    async fn query(
        &self,
        query: &'static str,
        variables: Value,
        field: &str,
    ) -> Result<RemoteResponse, TransportError> {
        let request = self
            .http
            .post(&self.endpoint)
            .header(PROJECT_HEADER, &self.project_id);
        let request = match self.credentials() {
            Credentials::AccessToken(token) => request.header(SIGNATURE_HEADER, token),
            Credentials::ApiKey(key) => request.bearer_auth(key),
        };

        let response = request
            .json(&GraphQlRequest { query, variables })
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(&e))?;

        let parsed = serde_json::from_str::<GraphQlResponse>(&body);
        if let Ok(graphql) = &parsed {
            if let Some(message) = graphql.first_error() {
                warn!(field, status = status.as_u16(), %message, "engine returned GraphQL error");
                return Ok(RemoteResponse::Error {
                    message: message.to_owned(),
                });
            }
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value = parsed?.take_field(field)?;
        let response = RemoteResponse::decode(value)?;
        debug!(field, status = ?response.status(), "engine responded");
        Ok(response)
    }
}

#[async_trait]
impl JobRemote for WorkflowClient {
    async fn submit(&self, job: &Job) -> Result<RemoteResponse, TransportError> {
        match job.kind {
            JobKind::Workflow => {
                let variables = json!({ "workflowId": job.job_id, "payload": job.payload });
                self.query(EXECUTE_WORKFLOW, variables, "executeWorkflow")
                    .await
            }
            JobKind::Agent => {
                let variables = json!({ "agentId": job.job_id, "payload": job.payload });
                self.query(EXECUTE_AGENT, variables, "executeAgent").await
            }
        }
    }

    async fn check_status(&self, request_id: &str) -> Result<RemoteResponse, TransportError> {
        self.query(CHECK_STATUS, json!({ "requestId": request_id }), "checkStatus")
            .await
    }
}

//! Jobs submitted to the remote workflow engine, the status envelopes it
//! answers with, and the terminal outcome of a run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::traits::TransportError;

/// Which entry point of the workflow engine a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A multi-step workflow (`executeWorkflow`).
    #[default]
    Workflow,
    /// A single agent (`executeAgent`).
    Agent,
}

/// A unit of work handed to the remote executor.
///
/// Transient: lives only for the duration of one submit + poll run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Identifier of the workflow or agent to execute.
    pub job_id: String,
    /// Entry point to use.
    #[serde(default)]
    pub kind: JobKind,
    /// Opaque input handed to the engine.
    pub payload: Value,
    /// When the job was built for submission.
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// Create a job of the given kind.
    #[must_use]
    pub fn new(kind: JobKind, job_id: impl Into<String>, payload: Value) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            payload,
            submitted_at: Utc::now(),
        }
    }

    /// Create a workflow job.
    #[must_use]
    pub fn workflow(workflow_id: impl Into<String>, payload: Value) -> Self {
        Self::new(JobKind::Workflow, workflow_id, payload)
    }

    /// Create an agent job.
    #[must_use]
    pub fn agent(agent_id: impl Into<String>, payload: Value) -> Self {
        Self::new(JobKind::Agent, agent_id, payload)
    }

    /// Create a job whose id is generated locally before submission.
    #[must_use]
    pub fn with_generated_id(kind: JobKind, payload: Value) -> Self {
        Self::new(kind, Uuid::new_v4().to_string(), payload)
    }
}

/// Status enumeration reported by the submit and status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
    Failed,
    Pending,
}

/// Raw status body as it arrives on the wire.
///
/// Decoding is strict: a missing or unknown `status`, or any field not listed
/// here, is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusEnvelope {
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
}

/// Decoded response of a submit or status call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RemoteResponse {
    /// The job finished; `result` is whatever the engine produced.
    Success { result: Value },
    /// The engine rejected or aborted the job.
    Error { message: String },
    /// The job ran and failed.
    Failed { message: String },
    /// Still running; poll again with `request_id`.
    Pending { request_id: String },
}

impl RemoteResponse {
    /// Decode a status body from a JSON value.
    ///
    /// # Errors
    /// Returns [`TransportError::Decode`] when the body does not match the
    /// status envelope or a pending body carries no request id.
    pub fn decode(value: Value) -> Result<Self, TransportError> {
        let envelope: StatusEnvelope = serde_json::from_value(value)?;
        Self::from_envelope(envelope)
    }

    /// Decode a status body from JSON text.
    ///
    /// # Errors
    /// Same as [`RemoteResponse::decode`].
    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        let envelope: StatusEnvelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    /// The status this response reports.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Success { .. } => JobStatus::Success,
            Self::Error { .. } => JobStatus::Error,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Pending { .. } => JobStatus::Pending,
        }
    }

    /// Where a run stands after this response.
    #[must_use]
    pub fn into_progress(self) -> Progress {
        match self {
            Self::Success { result } => Progress::Done(JobOutcome::Success { result }),
            Self::Error { message } | Self::Failed { message } => {
                Progress::Done(JobOutcome::Failed {
                    source: FailureSource::Remote,
                    message,
                })
            }
            Self::Pending { request_id } => Progress::Pending { request_id },
        }
    }

    /// Convert an already-parsed envelope.
    ///
    /// # Errors
    /// Returns [`TransportError::Decode`] for a pending envelope without a
    /// request id.
    pub fn from_envelope(envelope: StatusEnvelope) -> Result<Self, TransportError> {
        let StatusEnvelope {
            status,
            result,
            message,
            request_id,
        } = envelope;

        Ok(match status {
            JobStatus::Success => Self::Success {
                result: result.unwrap_or(Value::Null),
            },
            JobStatus::Error => Self::Error {
                message: failure_message(status, message, result.as_ref()),
            },
            JobStatus::Failed => Self::Failed {
                message: failure_message(status, message, result.as_ref()),
            },
            JobStatus::Pending => {
                // Async-mode engines nest the id inside `result`.
                let request_id = request_id
                    .or_else(|| {
                        result
                            .as_ref()
                            .and_then(|r| r.get("requestId"))
                            .and_then(Value::as_str)
                            .map(str::to_owned)
                    })
                    .ok_or_else(|| {
                        TransportError::Decode("pending status without a request id".into())
                    })?;
                Self::Pending { request_id }
            }
        })
    }
}

fn failure_message(status: JobStatus, message: Option<String>, result: Option<&Value>) -> String {
    message
        .or_else(|| result.and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| format!("remote reported {status:?} without a message").to_lowercase())
}

/// A response seen from the polling loop: finished, or poll again.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Done(JobOutcome),
    Pending { request_id: String },
}

/// Where a failed job's failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    /// Network or decode failure talking to the engine.
    Transport,
    /// The engine explicitly reported `error` or `failed`.
    Remote,
}

/// Error taxonomy shared by both components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    RemoteFailure,
    Timeout,
    Cancelled,
}

/// Terminal result of a job run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The engine reported success.
    Success { result: Value },
    /// The run failed; see `source` for transport vs remote.
    Failed {
        source: FailureSource,
        message: String,
    },
    /// The polling budget ran out. The job may still be running remotely.
    TimedOut { budget_secs: u64, message: String },
    /// A cancellation token fired before a terminal state was seen.
    Cancelled,
}

impl JobOutcome {
    /// Outcome for an exhausted polling budget.
    #[must_use]
    pub fn timed_out(budget: Duration) -> Self {
        let budget_secs = budget.as_secs();
        Self::TimedOut {
            budget_secs,
            message: format!(
                "status check timed out after {budget_secs} seconds; the job may still be \
                 executing remotely, check again in a few minutes"
            ),
        }
    }

    /// Outcome for a transport failure.
    #[must_use]
    pub fn transport_failure(err: &TransportError) -> Self {
        Self::Failed {
            source: FailureSource::Transport,
            message: err.to_string(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Map a non-success outcome onto the shared error taxonomy.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failed {
                source: FailureSource::Transport,
                ..
            } => Some(ErrorKind::Transport),
            Self::Failed {
                source: FailureSource::Remote,
                ..
            } => Some(ErrorKind::RemoteFailure),
            Self::TimedOut { .. } => Some(ErrorKind::Timeout),
            Self::Cancelled => Some(ErrorKind::Cancelled),
        }
    }

    /// HTTP-style code for display layers that expect one.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::Failed { .. } => 500,
            Self::TimedOut { .. } => 408,
            Self::Cancelled => 499,
        }
    }

    /// Human-readable message for failures, `None` on success.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failed { message, .. } | Self::TimedOut { message, .. } => Some(message),
            Self::Cancelled => Some("job cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_terminal_statuses() {
        let ok = RemoteResponse::decode(json!({"status": "success", "result": {"answer": 42}}))
            .unwrap();
        assert_eq!(
            ok,
            RemoteResponse::Success {
                result: json!({"answer": 42})
            }
        );

        let failed =
            RemoteResponse::decode(json!({"status": "failed", "message": "boom"})).unwrap();
        assert_eq!(
            failed.into_progress(),
            Progress::Done(JobOutcome::Failed {
                source: FailureSource::Remote,
                message: "boom".into()
            })
        );
    }

    #[test]
    fn test_pending_request_id_nested_in_result() {
        let resp = RemoteResponse::decode(json!({
            "status": "pending",
            "result": {"requestId": "req-7"}
        }))
        .unwrap();
        assert_eq!(
            resp,
            RemoteResponse::Pending {
                request_id: "req-7".into()
            }
        );
        assert_eq!(
            resp.into_progress(),
            Progress::Pending {
                request_id: "req-7".into()
            }
        );
    }

    #[test]
    fn test_pending_without_request_id_is_decode_error() {
        let err = RemoteResponse::decode(json!({"status": "pending"})).unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[test]
    fn test_unknown_status_and_fields_rejected() {
        assert!(RemoteResponse::from_json(r#"{"status": "running"}"#).is_err());
        assert!(RemoteResponse::from_json(r#"{"result": 1}"#).is_err());
        assert!(RemoteResponse::from_json(r#"{"status": "success", "extra": true}"#).is_err());
        assert!(RemoteResponse::from_json("not json").is_err());
    }

    #[test]
    fn test_error_without_message_gets_placeholder() {
        let resp = RemoteResponse::decode(json!({"status": "error"})).unwrap();
        assert_eq!(
            resp,
            RemoteResponse::Error {
                message: "remote reported error without a message".into()
            }
        );
    }

    #[test]
    fn test_timed_out_outcome() {
        let outcome = JobOutcome::timed_out(Duration::from_secs(900));
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(outcome.status_code(), 408);
        let message = outcome.message().unwrap();
        assert!(message.contains("900 seconds"));
        assert!(message.contains("may still be executing"));
    }

    #[test]
    fn test_generated_job_ids_are_unique() {
        let a = Job::with_generated_id(JobKind::Agent, json!({}));
        let b = Job::with_generated_id(JobKind::Agent, json!({}));
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(a.kind, JobKind::Agent);
    }
}

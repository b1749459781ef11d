//! Client construction errors and reqwest error mapping.

use synapse_core::TransportError;
use thiserror::Error;

/// Error building a transport client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Workflow endpoint is not configured")]
    MissingEndpoint,
    #[error("API key or access token is required")]
    MissingCredentials,
    #[error("Invalid base URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Map a reqwest failure onto the transport vocabulary.
pub(crate) fn transport_error(err: &reqwest::Error) -> TransportError {
    if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Read a response body, turning non-2xx statuses into
/// [`TransportError::Status`].
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String, TransportError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| transport_error(&e))?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

//! HTTP transports for the synapse client.
//!
//! Provides:
//! - `WorkflowClient` - GraphQL client of the workflow engine (`JobRemote`)
//! - `HttpSessionRemote` - chat REST API client (`SessionRemote`)
//! - Wire protocol DTOs

mod error;
pub mod protocol;
pub mod session_api;
pub mod workflow;

pub use error::ClientError;
pub use session_api::HttpSessionRemote;
pub use workflow::{Credentials, WorkflowClient};

//! Core types and seams for the synapse client.
//!
//! This crate provides the fundamental building blocks:
//! - `Job` / `JobOutcome` / `RemoteResponse` - job submission vocabulary
//! - `Session` / `Message` - chat session model
//! - `EventStore` - broadcast + history of synchronizer events
//! - `ClientSettings` - layered configuration
//! - Remote and cache traits

pub mod events;
pub mod job;
pub mod session;
pub mod settings;
pub mod traits;

pub use events::{EventStore, SyncEvent};
pub use job::{
    ErrorKind, FailureSource, Job, JobKind, JobOutcome, JobStatus, Progress, RemoteResponse,
};
pub use session::{AssistantReply, Message, Role, Session, SessionId};
pub use settings::ClientSettings;
pub use traits::{CacheError, JobRemote, SessionCache, SessionRemote, TransportError};

//! Chat session synchronization for the synapse client.
//!
//! Provides:
//! - `SessionSynchronizer` - session list, selection and histories, kept in
//!   step with the remote store and a local cache
//! - Cache implementations (memory, JSON file)

pub mod storage;
pub mod synchronizer;

pub use synchronizer::{
    History, LoadSource, SendOutcome, SessionSynchronizer, SyncError, SyncOptions,
};

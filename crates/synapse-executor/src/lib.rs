//! Submit-and-poll executor for remote workflow jobs.
//!
//! Provides:
//! - `PollingExecutor` - turns a possibly long-running remote job into one
//!   awaited `JobOutcome`
//! - `PollOptions` - polling cadence and time budget

pub mod polling;

pub use polling::{PollOptions, PollingExecutor};
pub use tokio_util::sync::CancellationToken;

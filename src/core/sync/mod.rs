//! The release-sync workflow.
//!
//! `Init -> Validating -> [GeneratingArtifact] -> [SyncingRepo] -> Done`, or
//! `Aborted` when the lock is held or validation fails. Generation failures
//! are logged and skipped over; a sync failure ends the run with exit 1 once
//! the lock is released.

mod orchestrator;
mod types;

pub use orchestrator::*;
pub use types::*;

pub mod defs;
pub mod state;

pub use defs::{Job, JobOutcome, JobRecord, JobStatus, JobTracker, OutcomeStatus};
pub use state::{MemoryJobTracker, run_tracked};

//! # System Constants
//!
//! Event names, well-known parameter and context keys, and the defaults used
//! when configuration leaves a value unset.

/// Lifecycle event names used in structured logs
pub mod events {
    pub const JOB_LAUNCH_REQUESTED: &str = "job.launch_requested";
    pub const JOB_LAUNCH_REJECTED: &str = "job.launch_rejected";
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_STOP_REQUESTED: &str = "job.stop_requested";
    pub const JOB_STOPPED: &str = "job.stopped";

    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_SKIPPED_COMPLETE: &str = "step.skipped_complete";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_STOPPED: &str = "step.stopped";

    pub const CHUNK_COMMITTED: &str = "chunk.committed";
    pub const CHUNK_ROLLED_BACK: &str = "chunk.rolled_back";

    pub const INPUT_DETECTED: &str = "trigger.input_detected";
    pub const INPUT_ARCHIVED: &str = "trigger.input_archived";
}

/// Well-known job parameter keys
pub mod parameters {
    /// Absolute path of the inbound file; identifying
    pub const FILE: &str = "file";
    /// Long parameter bumped by the run id incrementer
    pub const RUN_ID: &str = "run.id";
}

/// Execution context key suffix for a reader's committed position
pub const READ_COUNT_SUFFIX: &str = ".read.count";

/// Defaults applied when configuration omits a value
pub mod defaults {
    pub const CHUNK_SIZE: usize = 5;
    pub const WORKER_POOL_SIZE: usize = 4;
    pub const RETRY_BACKOFF_MS: u64 = 100;
    pub const POLL_INTERVAL_MS: u64 = 1_000;
    pub const DATABASE_MAX_CONNECTIONS: u32 = 10;
    pub const DATE_FORMAT: &str = "%Y-%m-%d";
    pub const AWAIT_POLL_INTERVAL_MS: u64 = 50;
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
}

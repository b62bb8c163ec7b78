//! # Error Types
//!
//! Crate-level error taxonomy for the batch runner.
//!
//! - **Launch rejections** ([`BatchError::JobInstanceAlreadyComplete`],
//!   [`BatchError::JobExecutionAlreadyRunning`], [`BatchError::JobRestartNotAllowed`])
//!   are returned synchronously and never create an execution.
//! - **Record-level errors** are [`ItemError`]s and are normally absorbed by the
//!   skip/retry policies; they only surface here once a step gives up on them.
//! - **Infrastructure failures** ([`BatchError::Repository`]) are fatal for the
//!   current launch attempt.

use thiserror::Error;

pub use crate::config::ConfigurationError;
pub use crate::item::ItemError;
pub use crate::repository::RepositoryError;
pub use crate::state_machine::StateMachineError;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Job instance already complete: job={job_name} key={job_key}")]
    JobInstanceAlreadyComplete { job_name: String, job_key: String },

    #[error("Job execution already running: job={job_name} execution_id={execution_id}")]
    JobExecutionAlreadyRunning { job_name: String, execution_id: i64 },

    #[error("Job restart not allowed: {job_name}")]
    JobRestartNotAllowed { job_name: String },

    #[error("No such job: {0}")]
    NoSuchJob(String),

    #[error("No such job execution: {0}")]
    NoSuchJobExecution(i64),

    #[error("Job execution {execution_id} is not running (status {status})")]
    JobExecutionNotRunning { execution_id: i64, status: String },

    #[error("Start limit {limit} exceeded for step {step_name}")]
    StartLimitExceeded { step_name: String, limit: u32 },

    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("Item error: {0}")]
    Item(#[from] ItemError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Launch requests rejected before any execution was created
    pub fn is_launch_rejection(&self) -> bool {
        matches!(
            self,
            Self::JobInstanceAlreadyComplete { .. }
                | Self::JobExecutionAlreadyRunning { .. }
                | Self::JobRestartNotAllowed { .. }
        )
    }

    /// Failures of the metadata store; nothing about the run can be trusted after one
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Repository(_) => true,
            Self::StateMachine(StateMachineError::Repository(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
